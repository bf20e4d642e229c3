//! Client error types.
//!
//! Network-origin failures are recovered at the connection-manager
//! boundary and never reach callers as errors; what callers see is API
//! misuse ([`ClientError::Capability`]), handshake failures, and
//! exception-shaped protocol replies.

use thiserror::Error;

/// Errors from the secure channel layer.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// TCP dial failure.
    #[error("dial failed: {0}")]
    Dial(std::io::Error),

    /// TLS handshake failure.
    #[error("tls handshake failed: {0}")]
    Handshake(std::io::Error),

    /// TLS configuration could not be built from the supplied material.
    #[error("tls configuration: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// Certificate bundle PEM could not be parsed.
    #[error("bad credentials: {0}")]
    BadCredentials(String),

    /// The endpoint host is not a valid TLS server name.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// Write to the socket failed.
    #[error("write failed: {0}")]
    Write(std::io::Error),

    /// An outbound message could not be encoded.
    #[error(transparent)]
    Encode(#[from] lumen_proto::ProtocolError),

    /// The channel was already closed.
    #[error("channel closed")]
    Closed,
}

/// Errors surfaced by the connection manager API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial or handshake failure while connecting.
    #[error(transparent)]
    Transport(#[from] ChannelError),

    /// The operation is not available in the channel's mode. No I/O is
    /// performed.
    #[error("operation requires {required} mode")]
    Capability {
        /// Mode the operation needs.
        required: &'static str,
    },

    /// `connect()` was called while a connection is already active.
    #[error("already connected")]
    AlreadyConnected,

    /// The processor never confirmed physical access within the wait
    /// window.
    #[error("physical access not granted within the wait window")]
    PhysicalAccessTimeout,

    /// The pairing handshake produced no signing result in time.
    #[error("pairing handshake timed out")]
    HandshakeTimeout,

    /// The processor answered with an exception-shaped body.
    #[error("processor exception: {0}")]
    Protocol(String),

    /// The in-flight entry was evicted by a later request on the same
    /// tag.
    #[error("request superseded by a newer request on the same tag")]
    Superseded,

    /// The connection went away before the call settled.
    #[error("disconnected")]
    Disconnected,
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
