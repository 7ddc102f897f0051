//! Error types for the codec, the device link and the sample store.

use thiserror::Error;

use crate::domain::Collection;
use crate::link::LinkState;

/// Errors raised while building or parsing a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Command byte plus payload does not fit in the frame body.
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    /// Received buffer is not exactly one frame long.
    #[error("malformed frame: expected 16 bytes, got {len}")]
    MalformedFrame { len: usize },

    /// Trailer byte disagrees with the sum of the frame body.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Errors returned by link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link not ready (state: {state:?})")]
    NotReady { state: LinkState },

    #[error("operation not allowed in state {state:?}")]
    InvalidState { state: LinkState },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("periodic reporting needs a running tokio runtime")]
    NoRuntime,
}

/// Errors returned by the sample store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },

    #[error("invalid {collection} sample: {reason}")]
    InvalidSample { collection: Collection, reason: String },

    #[error("store writer has shut down")]
    WriterClosed,

    #[error("storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
