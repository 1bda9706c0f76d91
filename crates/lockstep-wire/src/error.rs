//! Wire codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors produced when packing or unpacking protocol messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// A wall-clock frame was not exactly 32 bytes.
    #[error("wall-clock message wrong length: {0} bytes")]
    WrongLength(usize),

    /// A wall-clock frame carried an unknown version byte.
    #[error("wall-clock message version not recognised: {0}")]
    BadVersion(u8),

    /// A wall-clock frame carried an unknown message type.
    #[error("wall-clock message type not recognised: {0}")]
    BadMessageType(u8),

    /// A measurement candidate was requested from a non-response message.
    #[error("cannot derive a candidate from a non-response message")]
    NotAResponse,

    /// A JSON message failed validation.
    #[error("malformed {context}: {detail}")]
    Malformed {
        context: &'static str,
        detail: String,
    },

    /// A JSON message could not be parsed at all.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    pub(crate) fn malformed(context: &'static str, detail: impl Into<String>) -> Self {
        Self::Malformed {
            context,
            detail: detail.into(),
        }
    }
}
