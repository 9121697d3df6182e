//! Codec error types.
//!
//! None of these are fatal: callers log and drop the offending frame.

use thiserror::Error;

/// Failure to turn inbound bytes into a [`crate::Message`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Bytes are not well-formed JSON (or not UTF-8).
    #[error("malformed message: {0}")]
    Malformed(String),
    /// Well-formed JSON, but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// Object without a string `type` discriminator.
    #[error("message has no string \"type\" field")]
    MissingType,
    /// Known `type` whose fields do not match the expected shape.
    #[error("invalid {kind} message: {reason}")]
    InvalidFields {
        /// The wire `type` value.
        kind: String,
        /// What was wrong with the fields.
        reason: String,
    },
}

impl DecodeError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::InvalidFields { .. } => "invalid_fields",
        }
    }
}

/// Failure to serialize an outbound message.
#[derive(Debug, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeError(#[from] pub serde_json::Error);

/// Either side of the codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Outbound message could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
