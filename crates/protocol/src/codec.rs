//! Newline-delimited JSON framing.
//!
//! One frame is exactly one UTF-8 JSON object followed by `\n`. The codec
//! buffers partial reads across network chunks and never assumes one read
//! equals one message. Frames over the configured limit and frames whose
//! body does not parse are unrecoverable: the protocol has no
//! resynchronisation marker, so callers must close the session.

use bytes::{BufMut, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::{Message, MessageType};

/// Default per-frame ceiling. Update packages ride inside frames as base64,
/// so the limit is generous.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame exceeds {limit} bytes")]
    Oversized { limit: usize },
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid envelope: {0}")]
    Envelope(&'static str),
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the session must be torn down. Only an unknown tag inside a
    /// well-formed envelope leaves the stream in a usable state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownType(_))
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
}

/// Parse one frame body (delimiter already stripped).
pub fn parse_frame(line: &[u8]) -> Result<Message, FrameError> {
    let envelope: RawEnvelope = serde_json::from_slice(line)?;
    let Some(kind) = MessageType::from_wire(&envelope.kind) else {
        return Err(FrameError::UnknownType(envelope.kind));
    };
    let payload = match envelope.payload {
        None | Some(Value::Null) => serde_json::Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(FrameError::Envelope("payload must be an object")),
    };
    Ok(Message::with_payload(kind, payload))
}

/// Tokio codec for the newline-delimited message stream.
pub struct LineCodec {
    max_frame_len: usize,
    // Scan resume point so repeated partial reads stay O(n).
    next_index: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            next_index: 0,
        }
    }

    fn take_line(&mut self, buf: &mut BytesMut) -> Result<Option<BytesMut>, FrameError> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') else {
                if buf.len() > self.max_frame_len {
                    return Err(FrameError::Oversized {
                        limit: self.max_frame_len,
                    });
                }
                self.next_index = buf.len();
                return Ok(None);
            };
            let newline_at = self.next_index + offset;
            let mut line = buf.split_to(newline_at + 1);
            self.next_index = 0;
            line.truncate(line.len() - 1);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if line.len() > self.max_frame_len {
                return Err(FrameError::Oversized {
                    limit: self.max_frame_len,
                });
            }
            return Ok(Some(line));
        }
    }
}

impl Decoder for LineCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.take_line(buf)? {
            Some(line) => parse_frame(&line).map(Some),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        if let Some(message) = self.decode(buf)? {
            return Ok(Some(message));
        }
        // Treat EOF as the final delimiter for a trailing unterminated frame.
        let rest = buf.split_to(buf.len());
        self.next_index = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        parse_frame(&rest).map(Some)
    }
}

impl Encoder<Message> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, message: Message, buf: &mut BytesMut) -> Result<(), FrameError> {
        let body = serde_json::to_vec(&message)?;
        buf.reserve(body.len() + 1);
        buf.put_slice(&body);
        buf.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::error_codes;

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) = codec.decode(buf) {
            out.push(msg);
        }
        out
    }

    #[test]
    fn round_trips_representable_payloads() {
        let payloads = [
            json!({}),
            json!({ "version": "1.0" }),
            json!({ "nested": { "a": [1, 2, 3], "b": { "c": null } }, "f": 1.5 }),
        ];
        for payload in payloads {
            let original = match payload {
                Value::Object(map) => Message::with_payload(MessageType::Hello, map),
                _ => unreachable!(),
            };
            let mut codec = LineCodec::new();
            let mut buf = BytesMut::new();
            codec.encode(original.clone(), &mut buf).expect("encode");
            let decoded = codec.decode(&mut buf).expect("decode").expect("one frame");
            assert_eq!(decoded, original);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn splits_frames_across_partial_reads() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let wire = b"{\"type\":\"PING\",\"payload\":{}}\n{\"type\":\"GET_STATUS\"}\n";

        // Feed one byte at a time; no frame may surface early.
        let mut seen = Vec::new();
        for byte in wire.iter() {
            buf.put_u8(*byte);
            seen.extend(decode_all(&mut codec, &mut buf));
        }
        assert_eq!(
            seen.iter().map(|m| m.kind).collect::<Vec<_>>(),
            vec![MessageType::Ping, MessageType::GetStatus]
        );
    }

    #[test]
    fn multiple_frames_in_one_read() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"PING\"}\n\n{\"type\":\"PING\"}\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf).len(), 2);
    }

    #[test]
    fn rejects_oversized_frame_before_delimiter() {
        let mut codec = LineCodec::with_max_frame_len(16);
        let mut buf = BytesMut::from(&b"{\"type\":\"PING\",\"payload\":{\"pad\":\""[..]);
        let err = codec.decode(&mut buf).expect_err("must reject");
        assert!(matches!(err, FrameError::Oversized { limit: 16 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn malformed_json_is_fatal() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{not json}\n"[..]);
        let err = codec.decode(&mut buf).expect_err("must reject");
        assert!(matches!(err, FrameError::Json(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_type_is_recoverable_and_consumes_the_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"WARP\"}\n{\"type\":\"PING\"}\n"[..]);
        let err = codec.decode(&mut buf).expect_err("unknown tag");
        assert!(matches!(&err, FrameError::UnknownType(tag) if tag == "WARP"));
        assert!(!err.is_fatal());
        // The bad line was consumed; the stream keeps working.
        let next = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(next.kind, MessageType::Ping);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"PING\",\"payload\":[1]}\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::Envelope(_))
        ));
    }

    #[test]
    fn eof_flushes_trailing_unterminated_frame() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"PING\"}"[..]);
        let msg = codec.decode_eof(&mut buf).expect("decode").expect("frame");
        assert_eq!(msg.kind, MessageType::Ping);
        assert_eq!(codec.decode_eof(&mut buf).ok(), Some(None));
    }

    #[test]
    fn error_codes_are_stable() {
        // The monitor matches on these strings; keep them pinned.
        assert_eq!(error_codes::HANDSHAKE_REQUIRED, "handshake_required");
        assert_eq!(error_codes::UPDATE_BUSY, "update_busy");
    }
}
