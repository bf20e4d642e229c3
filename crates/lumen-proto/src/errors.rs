//! Protocol-level error types.

use thiserror::Error;

/// Errors produced while encoding or decoding protocol envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A line was not valid JSON or did not match the envelope shape.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// An outbound message could not be serialized.
    #[error("unencodable message: {0}")]
    UnencodableMessage(serde_json::Error),
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
