//! OIDC issuer certificate thumbprint
//!
//! IAM pins an OIDC provider to the SHA-1 fingerprint of the root certificate
//! its issuer presents. The chain is read from a direct TLS handshake with the
//! issuer. The chain is deliberately not verified: only its last certificate
//! matters, and it is fingerprinted rather than trusted.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

use crate::{Error, Result};

/// Port used when the issuer URL does not name one
pub const DEFAULT_ISSUER_PORT: u16 = 443;

/// Time allowed for the TCP connect and TLS handshake together
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Host and port of an OIDC issuer's TLS endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuerEndpoint {
    /// Issuer host name
    pub host: String,
    /// Issuer port
    pub port: u16,
}

impl std::fmt::Display for IssuerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse an issuer URL into the endpoint to handshake with
pub fn issuer_endpoint(issuer: &str) -> Result<IssuerEndpoint> {
    let url = Url::parse(issuer)
        .map_err(|e| Error::thumbprint(format!("parsing issuer url {}: {}", issuer, e)))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::thumbprint(format!("issuer url {} has no host", issuer)))?;

    Ok(IssuerEndpoint {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_ISSUER_PORT),
    })
}

/// Source of the certificate chain an issuer presents
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateChainSource: Send + Sync {
    /// DER encoded peer certificates, leaf first
    async fn peer_certificate_chain(&self, endpoint: &IssuerEndpoint) -> Result<Vec<Vec<u8>>>;
}

/// Reads the peer certificate chain over a direct TLS 1.2+ handshake
#[derive(Clone)]
pub struct TlsCertificateChainSource {
    connector: TlsConnector,
}

impl TlsCertificateChainSource {
    /// Create a source backed by the aws-lc-rs crypto provider
    pub fn new() -> Result<Self> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::thumbprint(format!("building TLS client config: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(FingerprintOnlyVerifier { provider }))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    async fn handshake(&self, endpoint: &IssuerEndpoint) -> Result<Vec<Vec<u8>>> {
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            Error::thumbprint(format!("invalid issuer host {}: {}", endpoint.host, e))
        })?;

        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| {
                Error::thumbprint(format!("querying oidc issuer endpoint {}: {}", endpoint, e))
            })?;

        let tls = self.connector.connect(server_name, tcp).await.map_err(|e| {
            Error::thumbprint(format!("TLS handshake with issuer {}: {}", endpoint, e))
        })?;

        let (_, connection) = tls.get_ref();
        let chain = connection
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default();
        Ok(chain)
    }
}

#[async_trait]
impl CertificateChainSource for TlsCertificateChainSource {
    async fn peer_certificate_chain(&self, endpoint: &IssuerEndpoint) -> Result<Vec<Vec<u8>>> {
        debug!(issuer = %endpoint, "reading issuer certificate chain");
        tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(endpoint))
            .await
            .map_err(|_| {
                Error::thumbprint(format!("timed out connecting to issuer {}", endpoint))
            })?
    }
}

/// Accepts any server certificate while still checking handshake signatures
#[derive(Debug)]
struct FingerprintOnlyVerifier {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for FingerprintOnlyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// SHA-1 fingerprint of the last certificate in a chain, as lowercase hex
pub fn root_thumbprint(chain: &[Vec<u8>]) -> Result<String> {
    use aws_lc_rs::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};

    let root = chain
        .last()
        .ok_or_else(|| Error::thumbprint("unable to get oidc issuers cert"))?;
    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, root);

    let mut hex = String::with_capacity(hash.as_ref().len() * 2);
    for byte in hash.as_ref() {
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

/// Thumbprint of the root certificate presented by an issuer
pub async fn issuer_thumbprint(
    source: &dyn CertificateChainSource,
    issuer: &str,
) -> Result<String> {
    let endpoint = issuer_endpoint(issuer)?;
    let chain = source.peer_certificate_chain(&endpoint).await?;
    root_thumbprint(&chain)
}
