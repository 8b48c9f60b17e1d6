//! Mutual TLS policy for both transport endpoints.
//!
//! Both sides of a connection present a certificate and verify the other's
//! against the configured CA:
//!
//! - **Server** (`server` module): the ingestion listener requires and verifies
//!   client certificates.
//! - **Client** (`client` module): the forwarder presents its certificate and
//!   verifies the listener, including its name.
//!
//! # Usage
//!
//! ```rust,ignore
//! use telemetry_relay_core::tls::{TlsConnector, TlsMaterial, TlsServerAcceptor};
//!
//! let material = TlsMaterial::new("server.crt", "server.key", "ca.crt");
//! let acceptor = TlsServerAcceptor::new(&material)?;
//! let tls_stream = acceptor.accept(tcp_stream).await?;
//!
//! let material = TlsMaterial::new("client.crt", "client.key", "ca.crt");
//! let connector = TlsConnector::new(&material)?;
//! let tls_stream = connector.connect(tcp_stream, Some("relay")).await?;
//! ```

pub mod client;
mod pem;
pub mod server;

use std::path::{Path, PathBuf};

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use serde::{Deserialize, Serialize};

pub use client::TlsConnector;
pub use server::TlsServerAcceptor;

/// Install the ring crypto provider if not already installed.
pub(crate) fn ensure_crypto_provider() {
    // Another component may have installed one already; either is fine.
    let _ = CryptoProvider::install_default(default_provider());
}

/// Certificate, key and CA files (PEM) identifying one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsMaterial {
    /// This endpoint's certificate chain.
    pub cert_path: PathBuf,

    /// Private key matching `cert_path` (PKCS#1, PKCS#8 or SEC1).
    pub key_path: PathBuf,

    /// CA used to verify the peer.
    ///
    /// Required on the listener side. On the sending side, leaving it unset
    /// falls back to the public webpki roots, which will not trust a
    /// privately signed listener.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
}

impl TlsMaterial {
    /// Bundle certificate material from paths.
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_cert_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: Some(ca_cert_path.into()),
        }
    }

    /// Certificate and key only, no CA to verify the peer with.
    pub fn without_ca(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: None,
        }
    }

    /// CA path, if configured.
    #[must_use]
    pub fn ca_cert_path(&self) -> Option<&Path> {
        self.ca_cert_path.as_deref()
    }
}
