//! Transport bootstrap: bind the listeners and feed accepted connections
//! into identical sessions.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing::{info, warn};

use furrow_config::FurrowConfig;

use crate::{services::GatewayServices, session::run_session, state::GatewayState};

/// A started gateway: shared state plus the bound TCP address (useful when
/// binding to port 0).
pub struct Gateway {
    pub state: Arc<GatewayState>,
    pub tcp_addr: Option<SocketAddr>,
}

/// Build the shared state and start every available transport.
///
/// A transport that fails to come up is logged and skipped — losing one of
/// them is not fatal as long as the other still listens.
pub async fn start_gateway(
    config: &FurrowConfig,
    services: GatewayServices,
) -> anyhow::Result<Gateway> {
    let version = furrow_config::paths::read_version(None);
    let profile = furrow_config::load_implement_profile(config.implement.profile_path.as_deref())?;
    let state = GatewayState::new(version, profile.to_payload(), config, services);

    let mut transports: Vec<&str> = Vec::new();
    let mut tcp_addr = None;

    match TcpListener::bind((config.gateway.tcp_bind.as_str(), config.gateway.tcp_port)).await {
        Ok(listener) => {
            let addr = listener.local_addr()?;
            info!(%addr, "tcp transport listening");
            tcp_addr = Some(addr);
            transports.push("tcp");
            tokio::spawn(tcp_accept_loop(listener, Arc::clone(&state)));
        },
        Err(e) => warn!(
            bind = %config.gateway.tcp_bind,
            port = config.gateway.tcp_port,
            error = %e,
            "tcp transport failed to bind"
        ),
    }

    #[cfg(feature = "bluetooth")]
    if config.gateway.bluetooth.enabled {
        match crate::bluetooth::start_rfcomm(Arc::clone(&state), &config.gateway.bluetooth).await {
            Ok(()) => transports.push("bluetooth"),
            Err(e) => warn!(error = %e, "bluetooth transport unavailable"),
        }
    }
    #[cfg(not(feature = "bluetooth"))]
    if config.gateway.bluetooth.enabled {
        info!("bluetooth transport not compiled in (enable the `bluetooth` feature)");
    }

    anyhow::ensure!(!transports.is_empty(), "no transport could be started");
    banner(&state, &transports);

    Ok(Gateway { state, tcp_addr })
}

async fn tcp_accept_loop(listener: TcpListener, state: Arc<GatewayState>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let peer = format!("tcp:{addr}");
                let state = Arc::clone(&state);
                tokio::spawn(run_session(stream, peer, state));
            },
            Err(e) => {
                warn!(error = %e, "tcp accept failed");
                tokio::time::sleep(Duration::from_millis(250)).await;
            },
        }
    }
}

fn banner(state: &GatewayState, transports: &[&str]) {
    let lines = [
        format!("furrow gateway v{}", state.version),
        format!("transports: {}", transports.join(", ")),
        format!("capabilities: {}", state.supported_capabilities.join(", ")),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));
}
