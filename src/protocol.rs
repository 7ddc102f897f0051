//! Ring command protocol: fixed-size frames exchanged over the command channels.

pub mod codec;

pub use codec::{checksum, decode, decode_verified, DecodedFrame, Frame};

/// Total length of one frame on the wire.
pub const FRAME_LEN: usize = 16;

/// Largest payload that fits between the command byte and the checksum.
pub const MAX_PAYLOAD_LEN: usize = FRAME_LEN - 2;

/// What to do with the checksum byte of frames received from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ChecksumPolicy {
    /// Accept every 16-byte notification as-is.
    #[default]
    Ignore,
    /// Drop notifications whose trailer does not match their body.
    Verify,
}

/// A command queued for transmission, typically produced by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl OutboundCommand {
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }
}
