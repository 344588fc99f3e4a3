//! Push unsolicited messages to connected monitor sessions.
//!
//! The core never originates this traffic itself; telemetry producers (the
//! route simulator or a real GNSS feed) call [`broadcast`] with a finished
//! message.

use tracing::trace;

use furrow_protocol::{Message, MessageType, capabilities};

use crate::state::GatewayState;

/// Capabilities that entitle a session to a given message class. An empty
/// slice means every handshaken session receives it.
fn required_capabilities(kind: MessageType) -> &'static [&'static str] {
    match kind {
        MessageType::GnssFix => &[capabilities::TELEMETRY_BASIC, capabilities::TELEMETRY_RTK],
        _ => &[],
    }
}

/// Send `message` to every handshaken session whose agreed capability set
/// covers it. Returns how many sessions it reached.
pub async fn broadcast(state: &GatewayState, message: Message) -> usize {
    let required = required_capabilities(message.kind);
    let fix_sequence = (message.kind == MessageType::GnssFix)
        .then(|| message.u64_field("sequence"))
        .flatten();

    let clients = state.clients.read().await;
    let mut delivered = 0;
    for client in clients.values() {
        if !required.is_empty() && !required.iter().any(|cap| client.has_capability(cap)) {
            continue;
        }
        if client.send(message.clone()) {
            delivered += 1;
            if let Some(sequence) = fix_sequence {
                client.fixes.mark_sent(sequence);
            }
        }
    }
    trace!(kind = %message.kind, delivered, "broadcast");
    delivered
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use tokio::sync::mpsc;

    use furrow_config::FurrowConfig;
    use furrow_protocol::GnssFix;

    use super::*;
    use crate::{
        services::GatewayServices,
        session::FixTracker,
        state::{ConnectedClient, GatewayState},
    };

    fn fake_client(
        conn_id: &str,
        caps: &[&str],
    ) -> (ConnectedClient, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ConnectedClient {
            conn_id: conn_id.to_string(),
            peer: format!("test:{conn_id}"),
            capabilities: caps.iter().map(|c| (*c).to_string()).collect(),
            sender: tx,
            fixes: Arc::new(FixTracker::default()),
            connected_at: Instant::now(),
        };
        (client, rx)
    }

    fn fix_message(sequence: u64) -> Message {
        GnssFix {
            latitude: -22.0,
            longitude: -47.0,
            altitude: 550.0,
            accuracy: None,
            sequence: Some(sequence),
            timestamp: None,
            heading_deg: None,
            speed_mps: None,
            rtk_state: None,
            implement: None,
        }
        .into_message()
    }

    #[tokio::test]
    async fn fixes_only_reach_telemetry_subscribers() {
        let state = GatewayState::new(
            "test",
            serde_json::Value::Null,
            &FurrowConfig::default(),
            GatewayServices::noop(),
        );
        let (subscriber, mut sub_rx) = fake_client("a", &[capabilities::TELEMETRY_RTK]);
        let (bystander, mut idle_rx) = fake_client("b", &[capabilities::IMPLEMENT_PROFILE]);
        let sub_fixes = Arc::clone(&subscriber.fixes);
        state.register_client(subscriber).await;
        state.register_client(bystander).await;

        let delivered = broadcast(&state, fix_message(7)).await;
        assert_eq!(delivered, 1);
        assert_eq!(sub_rx.recv().await.map(|m| m.kind), Some(MessageType::GnssFix));
        assert!(idle_rx.try_recv().is_err());

        // Delivery of a sequenced fix arms the ack tracker.
        assert!(sub_fixes.awaiting_ack());
    }

    #[tokio::test]
    async fn untagged_messages_reach_every_session() {
        let state = GatewayState::new(
            "test",
            serde_json::Value::Null,
            &FurrowConfig::default(),
            GatewayServices::noop(),
        );
        let (a, mut rx_a) = fake_client("a", &[]);
        let (b, mut rx_b) = fake_client("b", &[capabilities::TELEMETRY_BASIC]);
        state.register_client(a).await;
        state.register_client(b).await;

        let note = Message::new(MessageType::Info);
        assert_eq!(broadcast(&state, note).await, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }
}
