//! TLS connector for outbound sender connections.
//!
//! The sender presents its certificate and verifies the listener's chain and
//! name. Without a configured CA the public webpki roots are trusted instead.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tracing::debug;

use super::pem::{load_certificates, load_private_key, load_root_store};
use super::{ensure_crypto_provider, TlsMaterial};
use crate::error::{TlsError, TlsResult};

/// TLS connector for outbound connections to a listener.
#[derive(Clone)]
pub struct TlsConnector {
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Create a new connector from certificate material.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Certificate, key or CA files cannot be loaded
    /// - rustls rejects the client certificate
    pub fn new(material: &TlsMaterial) -> TlsResult<Self> {
        ensure_crypto_provider();
        let client_config = build_client_config(material)?;
        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Run the client side of the handshake.
    ///
    /// `server_name` is checked against the listener's certificate. When it
    /// is `None` the peer's IP address is used, which only matches
    /// certificates carrying that IP as a subject alternative name.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Config`] for an unusable server name and
    /// [`TlsError::Handshake`] if the handshake fails. Use
    /// [`TlsError::certificate_error`] to find out why the listener's
    /// certificate was rejected.
    pub async fn connect(
        &self,
        stream: TcpStream,
        server_name: Option<&str>,
    ) -> TlsResult<TlsStream<TcpStream>> {
        let server_name = match server_name {
            Some(name) => ServerName::try_from(name.to_string())
                .map_err(|e| TlsError::Config(format!("invalid server name '{name}': {e}")))?,
            None => ServerName::from(stream.peer_addr().map_err(TlsError::Handshake)?.ip()),
        };

        debug!(server_name = ?server_name, "initiating TLS handshake");
        self.inner
            .connect(server_name, stream)
            .await
            .map_err(TlsError::Handshake)
    }
}

fn build_client_config(material: &TlsMaterial) -> TlsResult<ClientConfig> {
    let root_store = match material.ca_cert_path() {
        Some(ca_path) => load_root_store(ca_path)?,
        None => {
            debug!("no CA configured, trusting webpki roots");
            let mut store = RootCertStore::empty();
            store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            store
        }
    };

    let certs = load_certificates(&material.cert_path)?;
    let key = load_private_key(&material.key_path)?;

    ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_client_auth_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("failed to configure client auth: {e}")))
}
