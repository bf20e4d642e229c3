//! Client runtime for lighting processors.
//!
//! Layers, bottom up:
//!
//! - [`transport`]: dial and TLS handshake behind the [`Transport`]
//!   trait. Production uses `tokio-rustls`; tests inject in-memory
//!   streams.
//! - [`channel`]: one live connection, with the read pump, frame
//!   decoding, and liveness monitoring.
//! - [`client`]: the connection manager. Request correlation,
//!   subscriptions that survive reconnects, the reconnection policy,
//!   and the pairing handshake.
//!
//! ```no_run
//! use lumen_client::{CertificateBundle, LumenClient};
//!
//! # async fn demo(bundle: CertificateBundle) -> Result<(), lumen_client::ClientError> {
//! let client = LumenClient::authenticated("192.168.1.20", bundle);
//! client.connect().await?;
//! let devices = client.read("/device").await?;
//! # let _ = devices;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod channel;
mod client;
mod endpoint;
mod error;
mod event;
mod pairing;
mod transport;

pub use client::{ConnectionState, LumenClient};
pub use endpoint::{CertificateBundle, ConnectionMode, Endpoint, PHYSICAL_PORT, SECURE_PORT};
pub use error::{ChannelError, ClientError, Result};
pub use event::LumenEvent;
pub use transport::{TlsTransport, Transport};
