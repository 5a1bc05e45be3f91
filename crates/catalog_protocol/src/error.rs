//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The bytes are not a valid message.
    #[error("decode error: {0}")]
    Decode(String),

    /// The action name does not map to a known operation.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The action is known but its params are malformed.
    #[error("invalid params for {action}: {message}")]
    InvalidParams {
        /// The action whose params failed to decode.
        action: &'static str,
        /// Decoder message.
        message: String,
    },
}
