//! Throwaway certificate authority for TLS tests.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair, SanType};
use tempfile::TempDir;

use crate::tls::TlsMaterial;

/// DNS name carried by the generated listener certificate.
pub const SERVER_NAME: &str = "relay";

/// A CA, a listener certificate and a sender certificate written as PEM
/// files into a temporary directory, plus a second unrelated CA with its own
/// sender certificate.
///
/// The directory is removed when this value is dropped.
pub struct TestPki {
    dir: TempDir,
}

impl TestPki {
    /// Generate fresh keys and certificates.
    ///
    /// # Panics
    ///
    /// Panics if certificate generation or writing fails (test-only).
    #[must_use]
    pub fn generate() -> Self {
        let dir = TempDir::new().expect("temp dir creation should succeed");

        let (ca_cert, ca_key) = generate_ca("Relay Test CA");
        write_pem(dir.path(), "ca.crt", &ca_cert.pem());

        let (server_cert, server_key) = generate_leaf(SERVER_NAME, &ca_cert, &ca_key);
        write_pem(dir.path(), "server.crt", &server_cert.pem());
        write_pem(dir.path(), "server.key", &server_key.serialize_pem());

        let (client_cert, client_key) = generate_leaf("sender", &ca_cert, &ca_key);
        write_pem(dir.path(), "client.crt", &client_cert.pem());
        write_pem(dir.path(), "client.key", &client_key.serialize_pem());

        let (rogue_ca, rogue_ca_key) = generate_ca("Rogue CA");
        write_pem(dir.path(), "rogue-ca.crt", &rogue_ca.pem());

        let (rogue_cert, rogue_key) = generate_leaf("sender", &rogue_ca, &rogue_ca_key);
        write_pem(dir.path(), "rogue-client.crt", &rogue_cert.pem());
        write_pem(dir.path(), "rogue-client.key", &rogue_key.serialize_pem());

        Self { dir }
    }

    /// Directory holding every generated file.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// The trusted CA certificate.
    #[must_use]
    pub fn ca_cert_path(&self) -> PathBuf {
        self.dir.path().join("ca.crt")
    }

    /// The unrelated CA certificate.
    #[must_use]
    pub fn rogue_ca_cert_path(&self) -> PathBuf {
        self.dir.path().join("rogue-ca.crt")
    }

    /// Listener certificate (DNS name [`SERVER_NAME`]) trusting the CA.
    #[must_use]
    pub fn server_material(&self) -> TlsMaterial {
        TlsMaterial::new(
            self.dir.path().join("server.crt"),
            self.dir.path().join("server.key"),
            self.ca_cert_path(),
        )
    }

    /// Sender certificate signed by the CA, trusting the CA.
    #[must_use]
    pub fn client_material(&self) -> TlsMaterial {
        TlsMaterial::new(
            self.dir.path().join("client.crt"),
            self.dir.path().join("client.key"),
            self.ca_cert_path(),
        )
    }

    /// Sender certificate signed by the rogue CA, still trusting the real CA
    /// so only the listener's verification fails.
    #[must_use]
    pub fn untrusted_client_material(&self) -> TlsMaterial {
        TlsMaterial::new(
            self.dir.path().join("rogue-client.crt"),
            self.dir.path().join("rogue-client.key"),
            self.ca_cert_path(),
        )
    }
}

fn generate_ca(common_name: &str) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let key = KeyPair::generate().expect("key generation should succeed");
    let cert = params
        .self_signed(&key)
        .expect("self-signing should succeed");
    (cert, key)
}

fn generate_leaf(name: &str, ca_cert: &Certificate, ca_key: &KeyPair) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::default();
    params.distinguished_name.push(DnType::CommonName, name);
    params.subject_alt_names = vec![SanType::DnsName(
        name.try_into().expect("valid DNS name"),
    )];

    let key = KeyPair::generate().expect("key generation should succeed");
    let cert = params
        .signed_by(&key, ca_cert, ca_key)
        .expect("cert signing should succeed");
    (cert, key)
}

fn write_pem(dir: &Path, file: &str, pem: &str) {
    fs::write(dir.join(file), pem).expect("writing PEM file should succeed");
}
