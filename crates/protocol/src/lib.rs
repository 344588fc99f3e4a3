//! Wire protocol shared by the gateway, the monitor apps, and the
//! telemetry producers: message envelope, closed tag set, response
//! builders, and the newline-delimited JSON codec.

pub mod codec;
pub mod messages;

pub use codec::{DEFAULT_MAX_FRAME_BYTES, FrameError, LineCodec, parse_frame};
pub use messages::{GnssFix, Message, MessageType, capabilities, error_codes};
