//! Per-connection session: handshake state machine plus the receive loop
//! that turns frames into typed messages and responses.
//!
//! Each session runs on its own task and owns its connection and parse
//! buffer exclusively; only the single [`GatewayState`] crosses the
//! ownership boundary. A blocking or slow peer therefore never stalls the
//! other sessions.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    time::{Duration, timeout},
};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use furrow_protocol::{FrameError, LineCodec, Message, error_codes, messages};

use crate::{
    dispatch::{AfterClose, dispatch},
    state::GatewayState,
};

// ── Session state machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh connection; only `HELLO` is admissible.
    AwaitingHello,
    /// Handshake done; messages flow through the dispatcher.
    Active,
    /// Terminal; the connection is being released.
    Closed,
}

/// Per-session bookkeeping handed to the dispatcher.
pub struct Session {
    pub conn_id: String,
    pub peer: String,
    pub state: SessionState,
    /// Capability set agreed during the handshake.
    pub capabilities: Vec<String>,
    pub fixes: Arc<FixTracker>,
}

// ── GNSS fix acknowledgement tracking ────────────────────────────────────────

#[derive(Debug, Default, Clone)]
struct FixState {
    pending: Option<u64>,
    last_sequence: Option<u64>,
    last_status: Option<String>,
    last_timestamp: Option<f64>,
}

/// Tracks which pushed fix still awaits a monitor acknowledgement. Shared
/// between the session (which sees `GNSS_ACK`) and the broadcast path
/// (which marks fixes as sent).
#[derive(Debug, Default)]
pub struct FixTracker {
    inner: Mutex<FixState>,
}

impl FixTracker {
    fn lock(&self) -> std::sync::MutexGuard<'_, FixState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_sent(&self, sequence: u64) {
        self.lock().pending = Some(sequence);
    }

    pub fn acknowledge(&self, sequence: u64, status: &str, timestamp: Option<f64>) {
        let mut state = self.lock();
        state.last_sequence = Some(sequence);
        state.last_status = Some(status.to_string());
        state.last_timestamp = timestamp;
        if state.pending == Some(sequence) {
            state.pending = None;
        }
    }

    pub fn awaiting_ack(&self) -> bool {
        self.lock().pending.is_some()
    }

    pub fn last_ack(&self) -> Option<(u64, Option<String>)> {
        let state = self.lock();
        state.last_sequence.map(|seq| (seq, state.last_status.clone()))
    }

    pub fn last_ack_timestamp(&self) -> Option<f64> {
        self.lock().last_timestamp
    }
}

// ── Receive loop ─────────────────────────────────────────────────────────────

enum Inbound {
    Message(Message),
    /// Well-formed envelope with a tag outside the closed set.
    UnknownType(String),
    /// Framing failure; the stream has no resync point.
    Fatal(FrameError),
    Eof,
    IdleTimeout,
}

async fn next_inbound<R>(frames: &mut R, idle_timeout_secs: u64) -> Inbound
where
    R: Stream<Item = Result<Message, FrameError>> + Unpin,
{
    let item = if idle_timeout_secs == 0 {
        frames.next().await
    } else {
        match timeout(Duration::from_secs(idle_timeout_secs), frames.next()).await {
            Ok(item) => item,
            Err(_) => return Inbound::IdleTimeout,
        }
    };
    match item {
        None => Inbound::Eof,
        Some(Ok(message)) => Inbound::Message(message),
        Some(Err(FrameError::UnknownType(tag))) => Inbound::UnknownType(tag),
        Some(Err(e)) => Inbound::Fatal(e),
    }
}

async fn write_loop<W>(mut sink: W, mut rx: mpsc::UnboundedReceiver<Message>)
where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "session write failed");
            return;
        }
    }
    let _ = sink.close().await;
}

/// Drive one accepted connection until it closes. Transport-agnostic: TCP
/// and RFCOMM streams run through the identical loop.
pub async fn run_session<S>(stream: S, peer: String, state: Arc<GatewayState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn_id = state.next_conn_id(&peer);
    info!(conn = %conn_id, "connection opened");

    let framed = Framed::new(stream, LineCodec::with_max_frame_len(state.max_frame_bytes));
    let (sink, mut frames) = framed.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    // Responses and broadcast frames share this writer, which preserves the
    // per-session ordering guarantee.
    let writer = tokio::spawn(write_loop(sink, rx));

    let mut session = Session {
        conn_id: conn_id.clone(),
        peer,
        state: SessionState::AwaitingHello,
        capabilities: Vec::new(),
        fixes: Arc::new(FixTracker::default()),
    };

    let mut after_close = None;
    loop {
        match next_inbound(&mut frames, state.idle_timeout_secs).await {
            Inbound::Message(message) => {
                let outcome = dispatch(&mut session, &state, &tx, message).await;
                if let Some(reply) = outcome.reply {
                    let _ = tx.send(reply);
                }
                if outcome.close {
                    after_close = outcome.after_close;
                    break;
                }
            },
            Inbound::UnknownType(tag) => {
                if session.state == SessionState::AwaitingHello {
                    warn!(conn = %session.conn_id, tag, "unknown message before handshake");
                    let _ = tx.send(messages::error_message(
                        "handshake required",
                        error_codes::HANDSHAKE_REQUIRED,
                    ));
                    break;
                }
                debug!(conn = %session.conn_id, tag, "unknown message type");
                let _ = tx.send(messages::error_message(
                    &format!("unsupported message: {tag}"),
                    error_codes::UNSUPPORTED,
                ));
            },
            Inbound::Fatal(e) => {
                warn!(conn = %session.conn_id, error = %e, "unrecoverable frame");
                let _ = tx.send(messages::error_message_with(
                    "invalid message frame",
                    error_codes::BAD_FRAME,
                    serde_json::json!({ "error": e.to_string() }),
                ));
                break;
            },
            Inbound::Eof => {
                debug!(conn = %session.conn_id, "peer closed the connection");
                break;
            },
            Inbound::IdleTimeout => {
                info!(conn = %session.conn_id, "closing idle session");
                break;
            },
        }
    }

    session.state = SessionState::Closed;
    state.remove_client(&session.conn_id).await;
    // Dropping the sender lets the writer drain queued frames (including a
    // final error or the REBOOT ack) before the connection is released.
    drop(tx);
    let _ = writer.await;

    if let Some(AfterClose::Reboot) = after_close {
        if let Err(e) = state.services.host.reboot().await {
            warn!(conn = %conn_id, error = %e, "reboot handoff failed");
        }
    }

    info!(conn = %conn_id, "connection closed");
}
