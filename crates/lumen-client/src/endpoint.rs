//! Connection endpoints and credential material.

/// Default port for authenticated (certificate) connections.
pub const SECURE_PORT: u16 = 8081;

/// Default port for unauthenticated physical-pairing connections.
pub const PHYSICAL_PORT: u16 = 8083;

/// TLS mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Mutual-TLS connection with a paired certificate bundle.
    Authenticated,
    /// Unauthenticated connection to the pairing port. The processor's
    /// self-signed certificate is accepted without verification; trust
    /// is established out of band by the physical-access confirmation.
    Physical,
}

/// Where and how to reach a processor. Immutable per channel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// TLS mode.
    pub mode: ConnectionMode,
}

impl Endpoint {
    /// Authenticated endpoint on the default secure port.
    pub fn authenticated(host: impl Into<String>) -> Self {
        Self { host: host.into(), port: SECURE_PORT, mode: ConnectionMode::Authenticated }
    }

    /// Physical-pairing endpoint on the default pairing port.
    pub fn physical(host: impl Into<String>) -> Self {
        Self { host: host.into(), port: PHYSICAL_PORT, mode: ConnectionMode::Physical }
    }
}

/// Certificate material for one paired processor, as portable PEM text.
///
/// Produced by the pairing handshake and supplied back at construction
/// on later runs; persistence across restarts belongs to an external
/// credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Root CA of the processor.
    pub ca: String,
    /// Client certificate issued during pairing.
    pub cert: String,
    /// Client private key, PKCS#8.
    pub key: String,
}
