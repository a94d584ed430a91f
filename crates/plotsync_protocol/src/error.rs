//! Error types for protocol encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message could not be serialized.
    #[error("failed to encode {message}: {source}")]
    Encode {
        /// Message type being encoded.
        message: &'static str,
        /// Underlying serializer error.
        source: serde_json::Error,
    },

    /// The bytes did not contain a valid message.
    #[error("failed to decode {message}: {source}")]
    Decode {
        /// Message type being decoded.
        message: &'static str,
        /// Underlying deserializer error.
        source: serde_json::Error,
    },

    /// The message decoded but violates a protocol rule.
    #[error("invalid {message}: {reason}")]
    Invalid {
        /// Message type.
        message: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ProtocolError {
    pub(crate) fn invalid(message: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            message,
            reason: reason.into(),
        }
    }
}
