//! PEM loading shared by the server and client sides.

use std::io::BufReader;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use tracing::{debug, warn};

use crate::error::{TlsError, TlsResult};

/// Load certificates from a PEM file.
pub(crate) fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::CertificateLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| match result {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "skipping invalid certificate");
                None
            }
        })
        .collect();

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    debug!(count = certs.len(), path = %path.display(), "loaded certificates");
    Ok(certs)
}

/// Load the first private key found in a PEM file.
pub(crate) fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::PrivateKeyLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::PrivateKeyLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
        .ok_or_else(|| TlsError::NoPrivateKeys(path.display().to_string()))
}

/// Build a trust store holding every certificate in `ca_path`.
pub(crate) fn load_root_store(ca_path: &Path) -> TlsResult<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(load_certificates(ca_path)?);
    debug!(added, ignored, path = %ca_path.display(), "loaded CA certificates");

    if added == 0 {
        return Err(TlsError::NoCertificates(ca_path.display().to_string()));
    }
    Ok(root_store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPki;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_generated_material() {
        let pki = TestPki::generate();
        let server = pki.server_material();

        assert_eq!(load_certificates(&server.cert_path).unwrap().len(), 1);
        assert!(load_private_key(&server.key_path).is_ok());
        assert!(load_root_store(&pki.ca_cert_path()).is_ok());
    }

    #[test]
    fn test_missing_certificate_file() {
        let err = load_certificates(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, TlsError::CertificateLoad { .. }));
    }

    #[test]
    fn test_missing_key_file() {
        let err = load_private_key(Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(matches!(err, TlsError::PrivateKeyLoad { .. }));
    }

    #[test]
    fn test_empty_pem_files() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not a pem file\n").unwrap();
        file.flush().unwrap();

        assert!(matches!(
            load_certificates(file.path()),
            Err(TlsError::NoCertificates(_))
        ));
        assert!(matches!(
            load_private_key(file.path()),
            Err(TlsError::NoPrivateKeys(_))
        ));
    }

    #[test]
    fn test_key_file_is_not_a_certificate() {
        let pki = TestPki::generate();
        let server = pki.server_material();
        assert!(matches!(
            load_certificates(&server.key_path),
            Err(TlsError::NoCertificates(_))
        ));
    }
}
