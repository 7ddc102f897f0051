//! Frame encoding and decoding.
//!
//! A frame is always [`FRAME_LEN`] bytes: the command opcode, up to
//! [`MAX_PAYLOAD_LEN`] payload bytes padded with zeros, and a trailing
//! checksum equal to the wrapping 8-bit sum of everything before it.

use core::fmt;

use crate::error::CodecError;
use crate::protocol::{FRAME_LEN, MAX_PAYLOAD_LEN};

const CHECKSUM_INDEX: usize = FRAME_LEN - 1;

/// Wrapping 8-bit sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// A locally constructed frame, ready for the command-in channel.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Build a frame for `command` carrying `payload`.
    pub fn encode(command: u8, payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(CodecError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = command;
        bytes[1..1 + payload.len()].copy_from_slice(payload);
        bytes[CHECKSUM_INDEX] = checksum(&bytes[..CHECKSUM_INDEX]);
        Ok(Self(bytes))
    }

    pub fn command(&self) -> u8 {
        self.0[0]
    }

    pub fn checksum(&self) -> u8 {
        self.0[CHECKSUM_INDEX]
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Recompute the trailer and compare it with the stored one.
    pub fn verify(&self) -> Result<(), CodecError> {
        verify_trailer(&self.0)
    }

    /// Space-separated uppercase hex, e.g. `01 AA BB 00 ...`.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame[{}]", self.to_hex())
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A notification received from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedFrame {
    pub command: u8,
    /// Bytes 1..=14 of the frame, padding included.
    pub payload: [u8; MAX_PAYLOAD_LEN],
    pub checksum: u8,
}

/// Split a received buffer into command and payload.
///
/// The checksum is carried along but not checked; see [`decode_verified`].
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, CodecError> {
    if bytes.len() != FRAME_LEN {
        return Err(CodecError::MalformedFrame { len: bytes.len() });
    }

    let mut payload = [0u8; MAX_PAYLOAD_LEN];
    payload.copy_from_slice(&bytes[1..CHECKSUM_INDEX]);
    Ok(DecodedFrame {
        command: bytes[0],
        payload,
        checksum: bytes[CHECKSUM_INDEX],
    })
}

/// Like [`decode`], but rejects frames whose trailer does not match.
pub fn decode_verified(bytes: &[u8]) -> Result<DecodedFrame, CodecError> {
    let frame = decode(bytes)?;
    verify_trailer(bytes)?;
    Ok(frame)
}

fn verify_trailer(bytes: &[u8]) -> Result<(), CodecError> {
    let expected = checksum(&bytes[..CHECKSUM_INDEX]);
    let actual = bytes[CHECKSUM_INDEX];
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
