//! Shared TCP + TLS connection helpers
//!
//! Both protocol clients speak implicit TLS: the handshake happens
//! right after the TCP connect, before any protocol greeting.

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

/// A TLS-wrapped TCP stream to the mail server.
pub type MailStream = TlsStream<TcpStream>;

/// Run `fut`, failing with `on_timeout()` once `limit` elapses.
pub async fn with_timeout<T, F>(
    limit: Duration,
    fut: F,
    on_timeout: impl FnOnce() -> Error,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(on_timeout()))
}

/// Root store: platform certificates first, Mozilla roots if the
/// platform store is empty or unreadable.
fn root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!("Loaded {} platform certificates ({} ignored)", added, ignored);
        }
        Err(e) => warn!("Could not load platform certificates: {}", e),
    }
    if roots.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    roots
}

fn tls_connector(config: &ConnectionConfig) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Connect {
            server: config.server(),
            reason: format!("TLS setup failed: {e}"),
        })?;

    let tls = if config.accept_invalid_certs {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(root_store())
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(tls)))
}

/// Open a TCP connection and complete the TLS handshake.
///
/// DNS resolution, the TCP connect and the handshake share the
/// configured timeout budget.
///
/// # Errors
///
/// Returns [`Error::Connect`] if the server name is invalid or the
/// connect or handshake fails or times out.
pub async fn open(config: &ConnectionConfig) -> Result<MailStream> {
    let server = config.server();
    debug!("Connecting to {} server at {}", config.protocol, server);

    let connector = tls_connector(config)?;
    let server_name = ServerName::try_from(config.server_address.clone()).map_err(|e| {
        Error::Connect {
            server: server.clone(),
            reason: format!("Invalid server name: {e}"),
        }
    })?;

    let handshake = async {
        let tcp = TcpStream::connect(&server)
            .await
            .map_err(|e| Error::Connect {
                server: server.clone(),
                reason: e.to_string(),
            })?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Connect {
                server: server.clone(),
                reason: format!("TLS handshake failed: {e}"),
            })
    };

    with_timeout(config.timeout, handshake, || Error::Connect {
        server: server.clone(),
        reason: format!("timed out after {}s", config.timeout.as_secs()),
    })
    .await
}

/// Certificate verifier that accepts all certificates
/// (only used when `accept_invalid_certs` is set).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
