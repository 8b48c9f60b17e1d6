//! TLS acceptor for the ingestion listener.
//!
//! The listener acts as a TLS server: it presents its own certificate and
//! requires every sender to present one signed by the configured CA.

use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor as TokioTlsAcceptor;
use tracing::debug;

use super::pem::{load_certificates, load_private_key, load_root_store};
use super::{ensure_crypto_provider, TlsMaterial};
use crate::error::{TlsError, TlsResult};

/// TLS acceptor for inbound sender connections.
///
/// Cheap to clone; every connection task holds its own handle.
#[derive(Clone)]
pub struct TlsServerAcceptor {
    inner: TokioTlsAcceptor,
}

impl TlsServerAcceptor {
    /// Create a new acceptor from certificate material.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No CA is configured (client certificates are always verified)
    /// - Certificate, key or CA files cannot be loaded
    /// - rustls rejects the resulting configuration
    pub fn new(material: &TlsMaterial) -> TlsResult<Self> {
        ensure_crypto_provider();
        let server_config = build_server_config(material)?;
        Ok(Self {
            inner: TokioTlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Run the server side of the handshake on an accepted socket.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Handshake`] if the handshake fails, including when
    /// the peer presents no certificate or one the CA did not sign.
    pub async fn accept(&self, stream: TcpStream) -> TlsResult<TlsStream<TcpStream>> {
        self.inner.accept(stream).await.map_err(TlsError::Handshake)
    }
}

fn build_server_config(material: &TlsMaterial) -> TlsResult<ServerConfig> {
    let ca_path = material.ca_cert_path().ok_or_else(|| {
        TlsError::Config("listener TLS requires a CA certificate to verify senders".to_string())
    })?;

    let certs = load_certificates(&material.cert_path)?;
    let key = load_private_key(&material.key_path)?;

    debug!(ca_path = %ca_path.display(), "configuring mTLS with client certificate verification");
    let verifier = WebPkiClientVerifier::builder(Arc::new(load_root_store(ca_path)?))
        .build()
        .map_err(|e| TlsError::Config(format!("failed to build client verifier: {e}")))?;

    ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("failed to configure server cert: {e}")))
}
