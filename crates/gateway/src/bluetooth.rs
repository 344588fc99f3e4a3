//! Bluetooth RFCOMM transport (BlueZ).
//!
//! Optional by construction: a missing radio or Bluetooth stack makes the
//! bind fail, which disables this listener and nothing else. Accepted links
//! feed the same session loop as TCP connections.

use std::{sync::Arc, time::Duration};

use bluer::rfcomm::{Listener, SocketAddr};
use tracing::{info, warn};

use furrow_config::BluetoothConfig;

use crate::{session::run_session, state::GatewayState};

/// Bind the RFCOMM channel and start accepting monitor links.
pub async fn start_rfcomm(
    state: Arc<GatewayState>,
    config: &BluetoothConfig,
) -> anyhow::Result<()> {
    let local = SocketAddr::new(bluer::Address::any(), config.channel);
    let listener = Listener::bind(local).await?;
    info!(
        channel = config.channel,
        service = %config.service_name,
        "rfcomm transport listening"
    );

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let peer = format!("bt:{}", peer_addr.addr);
                    let state = Arc::clone(&state);
                    tokio::spawn(run_session(stream, peer, state));
                },
                Err(e) => {
                    warn!(error = %e, "rfcomm accept failed");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                },
            }
        }
    });

    Ok(())
}
