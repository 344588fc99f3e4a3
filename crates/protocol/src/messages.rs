//! Message model exchanged between the gateway and its monitor peers.
//!
//! Every frame on the wire is the envelope `{"type": TAG, "payload": {...}}`.
//! The tag set is closed: an unrecognised tag is a decode error, never a
//! silently dropped frame.

use std::fmt;

use serde::{Serialize, Serializer, ser::SerializeStruct};
use serde_json::{Map, Value};

/// Well-known error codes carried in `ERROR` payloads.
pub mod error_codes {
    pub const HANDSHAKE_REQUIRED: &str = "handshake_required";
    pub const UNSUPPORTED: &str = "unsupported";
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const BAD_FRAME: &str = "bad_frame";
    pub const STATE_CONFLICT: &str = "state_conflict";
    pub const DECODE_ERROR: &str = "decode_error";
    pub const INTEGRITY_ERROR: &str = "integrity_error";
    pub const IO_ERROR: &str = "io_error";
    pub const UPDATE_BUSY: &str = "update_busy";
}

/// Capability names negotiated during the handshake.
pub mod capabilities {
    pub const TELEMETRY_BASIC: &str = "telemetry/basic";
    pub const TELEMETRY_RTK: &str = "telemetry/rtk";
    pub const CORRECTIONS_NTRIP: &str = "corrections/ntrip";
    pub const IMPLEMENT_MANAGEMENT: &str = "implement/management";
    pub const IMPLEMENT_PROFILE: &str = "implement/profile";
    pub const UPDATE_ZIP: &str = "update/zip";

    /// Everything this gateway build knows how to do.
    pub const SUPPORTED: &[&str] = &[
        TELEMETRY_BASIC,
        TELEMETRY_RTK,
        CORRECTIONS_NTRIP,
        IMPLEMENT_MANAGEMENT,
        IMPLEMENT_PROFILE,
        UPDATE_ZIP,
    ];
}

// ── Message types ────────────────────────────────────────────────────────────

/// The closed set of wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    HelloAck,
    Ack,
    Error,
    Ping,
    Pong,
    Info,
    GetStatus,
    Status,
    StartJob,
    StopJob,
    Update,
    Reboot,
    GnssFix,
    GnssAck,
    NtripCorrection,
    NtripCorrectionAck,
}

impl MessageType {
    /// The uppercase tag used on the wire.
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::HelloAck => "HELLO_ACK",
            Self::Ack => "ACK",
            Self::Error => "ERROR",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Info => "INFO",
            Self::GetStatus => "GET_STATUS",
            Self::Status => "STATUS",
            Self::StartJob => "START_JOB",
            Self::StopJob => "STOP_JOB",
            Self::Update => "UPDATE",
            Self::Reboot => "REBOOT",
            Self::GnssFix => "GNSS_FIX",
            Self::GnssAck => "GNSS_ACK",
            Self::NtripCorrection => "NTRIP_CORRECTION",
            Self::NtripCorrectionAck => "NTRIP_CORRECTION_ACK",
        }
    }

    /// Parse a wire tag. `None` for anything outside the closed set.
    pub fn from_wire(tag: &str) -> Option<Self> {
        Some(match tag {
            "HELLO" => Self::Hello,
            "HELLO_ACK" => Self::HelloAck,
            "ACK" => Self::Ack,
            "ERROR" => Self::Error,
            "PING" => Self::Ping,
            "PONG" => Self::Pong,
            "INFO" => Self::Info,
            "GET_STATUS" => Self::GetStatus,
            "STATUS" => Self::Status,
            "START_JOB" => Self::StartJob,
            "STOP_JOB" => Self::StopJob,
            "UPDATE" => Self::Update,
            "REBOOT" => Self::Reboot,
            "GNSS_FIX" => Self::GnssFix,
            "GNSS_ACK" => Self::GnssAck,
            "NTRIP_CORRECTION" => Self::NtripCorrection,
            "NTRIP_CORRECTION_ACK" => Self::NtripCorrectionAck,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// One protocol message: a tag plus a JSON object payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub payload: Map<String, Value>,
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            payload: Map::new(),
        }
    }

    pub fn with_payload(kind: MessageType, payload: Map<String, Value>) -> Self {
        Self { kind, payload }
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut envelope = serializer.serialize_struct("Message", 2)?;
        envelope.serialize_field("type", &self.kind)?;
        envelope.serialize_field("payload", &self.payload)?;
        envelope.end()
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ── Response builders ────────────────────────────────────────────────────────

/// Build an `ERROR` message with a human-readable reason and machine code.
pub fn error_message(reason: &str, code: &str) -> Message {
    Message::with_payload(
        MessageType::Error,
        object(serde_json::json!({ "reason": reason, "code": code })),
    )
}

/// `ERROR` with an extra `details` object attached.
pub fn error_message_with(reason: &str, code: &str, details: Value) -> Message {
    Message::with_payload(
        MessageType::Error,
        object(serde_json::json!({ "reason": reason, "code": code, "details": details })),
    )
}

pub fn hello_ack(version: &str, capabilities: &[String]) -> Message {
    Message::with_payload(
        MessageType::HelloAck,
        object(serde_json::json!({ "version": version, "capabilities": capabilities })),
    )
}

/// `ACK` for a completed command, tagged with the action it answers.
pub fn ack(action: MessageType) -> Message {
    Message::with_payload(
        MessageType::Ack,
        object(serde_json::json!({ "action": action.as_wire() })),
    )
}

/// `ACK` with extra result fields merged into the payload.
pub fn ack_with(action: MessageType, extra: Value) -> Message {
    let mut message = ack(action);
    if let Value::Object(map) = extra {
        message.payload.extend(map);
    }
    message
}

pub fn info_message(version: &str, uptime_s: u64, implement: Option<Value>) -> Message {
    let mut message = Message::with_payload(
        MessageType::Info,
        object(serde_json::json!({ "version": version, "uptime_s": uptime_s })),
    );
    if let Some(profile) = implement {
        message.payload.insert("implement".into(), profile);
    }
    message
}

/// `STATUS` response; `job` is `null` when no job has ever been started.
pub fn status_message(job: Option<Value>) -> Message {
    Message::with_payload(
        MessageType::Status,
        object(serde_json::json!({ "job": job.unwrap_or(Value::Null) })),
    )
}

pub fn ntrip_correction_ack(sequence: u64, status: &str, timestamp: Option<f64>) -> Message {
    let mut message = Message::with_payload(
        MessageType::NtripCorrectionAck,
        object(serde_json::json!({ "sequence": sequence, "status": status })),
    );
    if let Some(ts) = timestamp {
        message.payload.insert("timestamp".into(), ts.into());
    }
    message
}

// ── GNSS fix ─────────────────────────────────────────────────────────────────

/// One GNSS fix sample pushed to the monitor.
///
/// Coordinates are WGS84 decimal degrees, altitude in meters above sea
/// level. `sequence` is monotonic per producer so the monitor can order and
/// acknowledge fixes.
#[derive(Debug, Clone, Serialize)]
pub struct GnssFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtk_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implement: Option<Value>,
}

impl GnssFix {
    pub fn into_message(self) -> Message {
        let payload = serde_json::to_value(&self).unwrap_or(Value::Null);
        Message::with_payload(MessageType::GnssFix, object(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tags_round_trip() {
        for tag in [
            "HELLO",
            "HELLO_ACK",
            "GET_STATUS",
            "GNSS_FIX",
            "NTRIP_CORRECTION_ACK",
        ] {
            let kind = MessageType::from_wire(tag).expect("known tag");
            assert_eq!(kind.as_wire(), tag);
        }
        assert_eq!(MessageType::from_wire("SELF_DESTRUCT"), None);
    }

    #[test]
    fn error_message_carries_reason_and_code() {
        let msg = error_message("no job running", error_codes::STATE_CONFLICT);
        assert_eq!(msg.kind, MessageType::Error);
        assert_eq!(msg.str_field("reason"), Some("no job running"));
        assert_eq!(msg.str_field("code"), Some("state_conflict"));
    }

    #[test]
    fn hello_ack_lists_capabilities() {
        let caps = vec!["telemetry/rtk".to_string()];
        let msg = hello_ack("1.2.0", &caps);
        assert_eq!(msg.str_field("version"), Some("1.2.0"));
        assert_eq!(
            msg.payload.get("capabilities"),
            Some(&serde_json::json!(["telemetry/rtk"]))
        );
    }

    #[test]
    fn ack_with_merges_extra_fields() {
        let msg = ack_with(MessageType::StartJob, serde_json::json!({ "job_id": "j-1" }));
        assert_eq!(msg.str_field("action"), Some("START_JOB"));
        assert_eq!(msg.str_field("job_id"), Some("j-1"));
    }

    #[test]
    fn gnss_fix_omits_absent_fields() {
        let fix = GnssFix {
            latitude: -22.0,
            longitude: -47.0,
            altitude: 550.0,
            accuracy: None,
            sequence: Some(9),
            timestamp: None,
            heading_deg: None,
            speed_mps: None,
            rtk_state: Some("FIXED".into()),
            implement: None,
        };
        let msg = fix.into_message();
        assert_eq!(msg.kind, MessageType::GnssFix);
        assert_eq!(msg.u64_field("sequence"), Some(9));
        assert!(!msg.payload.contains_key("accuracy"));
    }
}
