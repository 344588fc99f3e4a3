//! Message dispatcher: one handler per wire tag.
//!
//! Dispatch is a closed match over [`MessageType`] rather than a
//! string-keyed table, so a tag without a handler is a compile error. Every
//! handler validates its payload before touching shared state; a malformed
//! payload answers `invalid_payload` and leaves the gateway untouched.

use std::{sync::Arc, time::Instant};

use base64::Engine;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use furrow_protocol::{Message, MessageType, error_codes, messages};

use crate::{
    session::{Session, SessionState},
    state::{ConnectedClient, GatewayState},
    update::{self, UpdateRequest},
};

// ── Dispatch outcome ─────────────────────────────────────────────────────────

/// Work the session loop performs once the connection goes quiet.
pub enum AfterClose {
    Reboot,
}

/// What a handled message asks of the session loop.
pub struct Dispatched {
    pub reply: Option<Message>,
    pub close: bool,
    pub after_close: Option<AfterClose>,
}

impl Dispatched {
    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            close: false,
            after_close: None,
        }
    }

    fn none() -> Self {
        Self {
            reply: None,
            close: false,
            after_close: None,
        }
    }

    /// Best-effort reply, then tear the session down.
    fn fatal(message: Message) -> Self {
        Self {
            reply: Some(message),
            close: true,
            after_close: None,
        }
    }

    fn reboot(message: Message) -> Self {
        Self {
            reply: Some(message),
            close: true,
            after_close: Some(AfterClose::Reboot),
        }
    }
}

fn invalid(reason: &str) -> Dispatched {
    Dispatched::reply(messages::error_message(reason, error_codes::INVALID_PAYLOAD))
}

// ── Entry point ──────────────────────────────────────────────────────────────

pub async fn dispatch(
    session: &mut Session,
    state: &Arc<GatewayState>,
    outbound: &mpsc::UnboundedSender<Message>,
    message: Message,
) -> Dispatched {
    if session.state == SessionState::AwaitingHello && message.kind != MessageType::Hello {
        warn!(conn = %session.conn_id, kind = %message.kind, "message before HELLO handshake");
        return Dispatched::fatal(messages::error_message(
            "handshake required",
            error_codes::HANDSHAKE_REQUIRED,
        ));
    }

    match message.kind {
        MessageType::Hello => on_hello(session, state, outbound, &message).await,
        MessageType::Ping => Dispatched::reply(Message::new(MessageType::Pong)),
        MessageType::Info => on_info(state),
        MessageType::GetStatus => on_get_status(state).await,
        MessageType::StartJob => on_start_job(session, state, &message).await,
        MessageType::StopJob => on_stop_job(session, state).await,
        MessageType::Update => on_update(state, &message).await,
        MessageType::Reboot => {
            info!(conn = %session.conn_id, "reboot requested");
            Dispatched::reboot(messages::ack(MessageType::Reboot))
        },
        MessageType::GnssAck => on_gnss_ack(session, state, &message).await,
        MessageType::NtripCorrection => on_ntrip_correction(state, &message).await,
        // Response-only tags have no business arriving inbound.
        MessageType::HelloAck
        | MessageType::Ack
        | MessageType::Error
        | MessageType::Pong
        | MessageType::Status
        | MessageType::GnssFix
        | MessageType::NtripCorrectionAck => Dispatched::reply(messages::error_message(
            &format!("unsupported message: {}", message.kind),
            error_codes::UNSUPPORTED,
        )),
    }
}

// ── Handshake ────────────────────────────────────────────────────────────────

async fn on_hello(
    session: &mut Session,
    state: &Arc<GatewayState>,
    outbound: &mpsc::UnboundedSender<Message>,
    message: &Message,
) -> Dispatched {
    if session.state == SessionState::Active {
        return Dispatched::reply(messages::error_message(
            "handshake already complete",
            error_codes::STATE_CONFLICT,
        ));
    }

    let Some(version) = message.str_field("version") else {
        return invalid("missing or malformed version");
    };

    // Absent capabilities means "everything you support"; a present field
    // must be an array of strings.
    let requested: Option<Vec<&str>> = match message.payload.get("capabilities") {
        None => None,
        Some(Value::Array(items)) => {
            let mut caps = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(cap) => caps.push(cap),
                    None => return invalid("capabilities must be an array of strings"),
                }
            }
            Some(caps)
        },
        Some(_) => return invalid("capabilities must be an array of strings"),
    };

    let agreed: Vec<String> = match requested {
        None => state
            .supported_capabilities
            .iter()
            .map(|c| (*c).to_string())
            .collect(),
        Some(caps) => {
            let mut agreed = Vec::new();
            for cap in caps {
                if state.supported_capabilities.contains(&cap)
                    && !agreed.iter().any(|a: &String| a == cap)
                {
                    agreed.push(cap.to_string());
                }
            }
            agreed
        },
    };

    session.capabilities = agreed.clone();
    session.state = SessionState::Active;
    state
        .register_client(ConnectedClient {
            conn_id: session.conn_id.clone(),
            peer: session.peer.clone(),
            capabilities: agreed.clone(),
            sender: outbound.clone(),
            fixes: Arc::clone(&session.fixes),
            connected_at: Instant::now(),
        })
        .await;

    info!(
        conn = %session.conn_id,
        monitor_version = version,
        capabilities = agreed.len(),
        "handshake complete"
    );
    Dispatched::reply(messages::hello_ack(&state.version, &agreed))
}

// ── Reads ────────────────────────────────────────────────────────────────────

fn on_info(state: &GatewayState) -> Dispatched {
    let implement = (state.implement_profile != Value::Null)
        .then(|| state.implement_profile.clone());
    Dispatched::reply(messages::info_message(
        &state.version,
        state.uptime_secs(),
        implement,
    ))
}

async fn on_get_status(state: &GatewayState) -> Dispatched {
    let job = state
        .job_snapshot()
        .await
        .and_then(|job| serde_json::to_value(job).ok());
    Dispatched::reply(messages::status_message(job))
}

// ── Job control ──────────────────────────────────────────────────────────────

async fn on_start_job(session: &Session, state: &GatewayState, message: &Message) -> Dispatched {
    let requested_id = match message.payload.get("job_id") {
        None => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(_) => return invalid("job_id must be a string"),
    };
    match state.start_job(requested_id).await {
        Ok(job) => {
            info!(conn = %session.conn_id, job = %job.id, "job started");
            Dispatched::reply(messages::ack_with(
                MessageType::StartJob,
                json!({ "job_id": job.id }),
            ))
        },
        Err(e) => Dispatched::reply(messages::error_message(
            &e.to_string(),
            error_codes::STATE_CONFLICT,
        )),
    }
}

async fn on_stop_job(session: &Session, state: &GatewayState) -> Dispatched {
    match state.stop_job().await {
        Ok(job) => {
            info!(conn = %session.conn_id, job = %job.id, "job stopped");
            Dispatched::reply(messages::ack_with(
                MessageType::StopJob,
                json!({ "job_id": job.id }),
            ))
        },
        Err(e) => Dispatched::reply(messages::error_message(
            &e.to_string(),
            error_codes::STATE_CONFLICT,
        )),
    }
}

// ── Updates ──────────────────────────────────────────────────────────────────

async fn on_update(state: &GatewayState, message: &Message) -> Dispatched {
    let (Some(name), Some(content_b64)) =
        (message.str_field("name"), message.str_field("content_b64"))
    else {
        return invalid("missing name/content_b64");
    };
    if !update::is_safe_package_name(name) {
        return invalid("package name must be a bare file name");
    }
    let declared_size = match message.payload.get("size") {
        None => None,
        Some(value) => match value.as_u64() {
            Some(size) => Some(size),
            None => return invalid("size must be a non-negative integer"),
        },
    };
    let declared_sha256 = match message.payload.get("sha256") {
        None => None,
        Some(Value::String(digest)) => Some(digest.clone()),
        Some(_) => return invalid("sha256 must be a hex string"),
    };

    let request = UpdateRequest {
        name: name.to_string(),
        content_b64: content_b64.to_string(),
        declared_size,
        declared_sha256,
    };
    match update::apply_update(state, request).await {
        Ok(staged) => Dispatched::reply(messages::ack_with(
            MessageType::Update,
            json!({ "name": name, "bytes": staged.bytes }),
        )),
        Err(e) => {
            warn!(package = name, error = %e, "update failed");
            Dispatched::reply(messages::error_message(&e.to_string(), e.code()))
        },
    }
}

// ── GNSS ─────────────────────────────────────────────────────────────────────

/// `GNSS_ACK` is the monitor's receipt for a pushed fix; it deliberately
/// produces no response of its own.
async fn on_gnss_ack(session: &Session, state: &GatewayState, message: &Message) -> Dispatched {
    let Some(sequence) = message.u64_field("sequence") else {
        warn!(conn = %session.conn_id, "GNSS_ACK without sequence");
        return Dispatched::none();
    };
    let status = message.str_field("status").unwrap_or_default().to_string();
    let timestamp = message.f64_field("timestamp");

    session.fixes.acknowledge(sequence, &status, timestamp);
    state
        .services
        .corrections
        .acknowledge_fix(sequence, &status, timestamp)
        .await;
    Dispatched::none()
}

async fn on_ntrip_correction(state: &GatewayState, message: &Message) -> Dispatched {
    let (Some(sequence), Some(format), Some(encoded)) = (
        message.u64_field("sequence"),
        message.str_field("format"),
        message.str_field("payload"),
    ) else {
        return invalid("missing sequence/format/payload");
    };
    let Ok(correction) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return invalid("invalid correction payload");
    };
    let timestamp = message.f64_field("timestamp");

    state
        .services
        .corrections
        .handle_correction(sequence, &correction, format, timestamp)
        .await;
    Dispatched::reply(messages::ntrip_correction_ack(sequence, "accepted", timestamp))
}
