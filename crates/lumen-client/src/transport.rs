//! Transport abstraction for the secure channel.
//!
//! Abstracts over the dial-and-handshake step so the connection manager
//! is independent of the socket layer. Production uses TLS over TCP via
//! `tokio-rustls`; tests inject in-memory streams.

use std::future::Future;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::endpoint::{CertificateBundle, ConnectionMode, Endpoint};
use crate::error::ChannelError;

/// Dials an endpoint and completes whatever handshake the transport
/// requires, yielding a byte stream and the negotiated protocol name.
pub trait Transport: Send + Sync + 'static {
    /// Established stream type.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `endpoint`, presenting `credentials` when the mode
    /// requires them.
    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: Option<&CertificateBundle>,
    ) -> impl Future<Output = Result<(Self::Stream, String), ChannelError>> + Send;
}

/// Production transport: TCP + rustls.
#[derive(Debug, Default)]
pub struct TlsTransport;

impl Transport for TlsTransport {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: Option<&CertificateBundle>,
    ) -> Result<(Self::Stream, String), ChannelError> {
        let config = match endpoint.mode {
            ConnectionMode::Authenticated => {
                let bundle = credentials.ok_or_else(|| {
                    ChannelError::BadCredentials(
                        "authenticated mode requires a certificate bundle".to_string(),
                    )
                })?;
                authenticated_config(bundle)?
            }
            ConnectionMode::Physical => physical_config()?,
        };

        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|_| ChannelError::InvalidServerName(endpoint.host.clone()))?;

        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(ChannelError::Dial)?;
        tcp.set_nodelay(true).map_err(ChannelError::Dial)?;

        let connector = TlsConnector::from(Arc::new(config));
        let stream = connector.connect(server_name, tcp).await.map_err(ChannelError::Handshake)?;

        let protocol = stream
            .get_ref()
            .1
            .protocol_version()
            .map_or_else(|| "TLS".to_string(), |v| format!("{v:?}"));

        Ok((stream, protocol))
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Mutual TLS trusting the bundle's root CA and presenting the bundle's
/// client certificate.
fn authenticated_config(bundle: &CertificateBundle) -> Result<rustls::ClientConfig, ChannelError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut bundle.ca.as_bytes()) {
        let cert = cert.map_err(|e| ChannelError::BadCredentials(format!("root CA: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| ChannelError::BadCredentials(format!("root CA rejected: {e}")))?;
    }

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut bundle.cert.as_bytes())
            .collect::<std::io::Result<_>>()
            .map_err(|e| ChannelError::BadCredentials(format!("client cert: {e}")))?;

    let key = rustls_pemfile::private_key(&mut bundle.key.as_bytes())
        .map_err(|e| ChannelError::BadCredentials(format!("private key: {e}")))?
        .ok_or_else(|| ChannelError::BadCredentials("no private key in bundle".to_string()))?;

    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)?;

    Ok(config)
}

/// TLS for the pairing port. The processor presents a self-signed
/// certificate that cannot be verified before pairing, so certificate
/// verification is disabled; trust comes from the physical-access
/// confirmation instead.
fn physical_config() -> Result<rustls::ClientConfig, ChannelError> {
    let provider = provider();
    let verifier = AcceptAnyServerCert { provider: provider.clone() };

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}

/// Verifier that accepts any server certificate. Only used on the
/// physical-pairing port.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
