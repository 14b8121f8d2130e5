//! Connection-establishment strategies.
//!
//! A [`Dial`] produces a raw bidirectional byte stream to the controller.
//! Three strategies exist: plain TCP, TLS pinned to a certificate
//! fingerprint, and service-discovery resolution through an injected
//! [`ServiceRegistry`]. Exactly one strategy is active per client; it is
//! shared by the HTTP transport and by the raw-socket call paths (attach,
//! streaming RPC).

use std::sync::Arc;

use async_trait::async_trait;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tower::ServiceExt;

use crate::error::ClientError;

/// A raw bidirectional byte stream produced by a dial strategy.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

/// Boxed connection handed to the transport and the raw call paths.
pub type Conn = Box<dyn Connection>;

/// Pluggable connection-establishment strategy.
///
/// `close` releases any resources the strategy holds; only the discovery
/// strategy has a non-trivial teardown (its registry subscription).
#[async_trait]
pub trait Dial: Send + Sync {
    /// Establish a connection to the configured target.
    async fn dial(&self) -> Result<Conn, ClientError>;

    /// Release resources owned by the strategy.
    async fn close(&self) {}
}

/// Runtime resolution of a logical service name to live addresses.
///
/// Injected explicitly into [`DiscoveryDial`] so the registry connection is
/// owned by the client and torn down with it, rather than living in
/// process-global state.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Resolve `service` to `host:port` addresses of live instances.
    async fn resolve(&self, service: &str) -> Result<Vec<String>, ClientError>;

    /// Release the registry subscription.
    async fn close(&self) {}
}

/// Thin pass-through to the platform TCP connect.
#[derive(Debug, Clone)]
pub struct DirectDial {
    addr: String,
}

impl DirectDial {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Dial for DirectDial {
    async fn dial(&self) -> Result<Conn, ClientError> {
        tracing::trace!(addr = %self.addr, "dialing tcp");
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ClientError::Transport(format!("connect {}: {}", self.addr, e)))?;
        Ok(Box::new(stream))
    }
}

/// TLS dial pinned to a certificate fingerprint.
///
/// The peer is accepted solely because the SHA-256 digest of its end-entity
/// certificate matches the configured pin; certificate-authority chains are
/// never consulted, so a chain-valid certificate with the wrong fingerprint
/// is still rejected.
pub struct PinnedTlsDial {
    addr: String,
    connector: HttpsConnector<HttpConnector>,
}

impl PinnedTlsDial {
    pub fn new(addr: impl Into<String>, pin: Vec<u8>) -> Result<Self, ClientError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ClientError::Config(format!("tls configuration: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier::new(pin)))
            .with_no_client_auth();

        let connector = HttpsConnectorBuilder::new()
            .with_tls_config(config)
            .https_only()
            .enable_http1()
            .build();

        Ok(Self {
            addr: addr.into(),
            connector,
        })
    }
}

#[async_trait]
impl Dial for PinnedTlsDial {
    async fn dial(&self) -> Result<Conn, ClientError> {
        tracing::trace!(addr = %self.addr, "dialing pinned tls");
        let uri: http::Uri = format!("https://{}", self.addr)
            .parse()
            .map_err(|e| ClientError::Transport(format!("bad address {}: {}", self.addr, e)))?;
        let io = self
            .connector
            .clone()
            .oneshot(uri)
            .await
            .map_err(|e| ClientError::Transport(format!("tls connect {}: {}", self.addr, e)))?;
        Ok(Box::new(TokioIo::new(io)))
    }
}

/// Dial through a service registry: resolve the logical name, connect to the
/// first live instance.
pub struct DiscoveryDial {
    service: String,
    registry: Arc<dyn ServiceRegistry>,
}

impl DiscoveryDial {
    pub fn new(service: impl Into<String>, registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            service: service.into(),
            registry,
        }
    }
}

#[async_trait]
impl Dial for DiscoveryDial {
    async fn dial(&self) -> Result<Conn, ClientError> {
        let addrs = self.registry.resolve(&self.service).await?;
        let Some(addr) = addrs.first() else {
            return Err(ClientError::Discovery(format!(
                "no instances registered for {}",
                self.service
            )));
        };
        tracing::trace!(service = %self.service, addr = %addr, "dialing resolved instance");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Transport(format!("connect {}: {}", addr, e)))?;
        Ok(Box::new(stream))
    }

    async fn close(&self) {
        self.registry.close().await;
    }
}

/// Certificate verifier that accepts a peer iff the SHA-256 digest of its
/// end-entity certificate equals the configured pin.
///
/// Signature verification is delegated to the ring crypto provider; only
/// chain validation is replaced.
#[derive(Debug)]
pub(crate) struct PinnedCertVerifier {
    pin: Vec<u8>,
}

impl PinnedCertVerifier {
    pub(crate) fn new(pin: Vec<u8>) -> Self {
        Self { pin }
    }
}

fn ring_signature_algorithms() -> &'static rustls::crypto::WebPkiSupportedAlgorithms {
    use std::sync::LazyLock;
    static ALGORITHMS: LazyLock<rustls::crypto::WebPkiSupportedAlgorithms> = LazyLock::new(|| {
        rustls::crypto::ring::default_provider().signature_verification_algorithms
    });
    &ALGORITHMS
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let digest = Sha256::digest(end_entity.as_ref());
        if digest.as_slice() != self.pin.as_slice() {
            return Err(rustls::Error::General(
                "certificate fingerprint does not match pin".into(),
            ));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, ring_signature_algorithms())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ring_signature_algorithms().supported_schemes()
    }
}
