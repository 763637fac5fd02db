//! Secure transport
//!
//! Server certificates are checked against the trust anchors in the key
//! store (a PEM file). A chain the anchors do not vouch for is still
//! accepted when the caller's [`TrustDecisionProvider`] accepted it on an
//! earlier attempt. Anything else fails the handshake, and the chain is
//! returned in [`ConnectError::TrustRejected`] so the caller can ask the
//! user and retry.

use crate::error::ConnectError;
use crate::trust::{Certificate, TrustDecisionProvider};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::{self, PemObject};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Trust anchors loaded from the key store file.
#[derive(Debug, Clone)]
pub struct KeyStore {
    roots: RootCertStore,
}

impl KeyStore {
    pub fn empty() -> Self {
        Self {
            roots: RootCertStore::empty(),
        }
    }

    /// Load every certificate in the PEM file at `path`.
    ///
    /// No path means no anchors; only caller-accepted chains will pass.
    pub fn load(path: Option<&Path>) -> Result<Self, ConnectError> {
        let Some(path) = path else {
            return Ok(Self::empty());
        };

        let keystore_error = |err: pem::Error| ConnectError::KeyStore {
            path: path.to_path_buf(),
            source: match err {
                pem::Error::Io(source) => source,
                other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
            },
        };

        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_file_iter(path).map_err(keystore_error)? {
            roots.add(cert.map_err(keystore_error)?)?;
        }
        debug!("Loaded {} trust anchors from {}", roots.len(), path.display());
        Ok(Self { roots })
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Opens TLS channels on top of connected TCP streams.
#[derive(Clone)]
pub struct SecureChannelFactory {
    keystore: Option<PathBuf>,
    trust: Arc<dyn TrustDecisionProvider>,
    provider: Arc<CryptoProvider>,
}

impl SecureChannelFactory {
    pub fn new(keystore: Option<PathBuf>, trust: Arc<dyn TrustDecisionProvider>) -> Self {
        Self {
            keystore,
            trust,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    /// Run the TLS handshake to completion over `tcp`.
    ///
    /// The key store is re-read on every call so anchors added between
    /// attempts take effect.
    pub async fn connect(
        &self,
        tcp: TcpStream,
        host: &str,
        port: u16,
    ) -> Result<TlsStream<TcpStream>, ConnectError> {
        let keystore = KeyStore::load(self.keystore.as_deref())?;
        let verifier = Arc::new(RecordingVerifier::new(
            keystore,
            self.trust.clone(),
            self.provider.clone(),
        )?);

        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();

        let server_name =
            ServerName::try_from(host.to_owned()).map_err(|e| ConnectError::UnknownHost {
                host: host.to_owned(),
                reason: e.to_string(),
            })?;

        match TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
        {
            Ok(stream) => Ok(stream),
            Err(err) => {
                let certificates = verifier.take_rejected();
                if certificates.is_empty() {
                    warn!("TLS handshake with {}:{} failed: {}", host, port, err);
                    Err(ConnectError::Io(err))
                } else {
                    warn!(
                        "{}:{} presented {} untrusted certificate(s)",
                        host,
                        port,
                        certificates.len()
                    );
                    Err(ConnectError::TrustRejected {
                        host: host.to_owned(),
                        port,
                        certificates,
                    })
                }
            }
        }
    }
}

/// Per-attempt verifier that remembers the chain it refused.
struct RecordingVerifier {
    anchors: Option<Arc<WebPkiServerVerifier>>,
    trust: Arc<dyn TrustDecisionProvider>,
    provider: Arc<CryptoProvider>,
    rejected: Mutex<Vec<Certificate>>,
}

impl RecordingVerifier {
    fn new(
        keystore: KeyStore,
        trust: Arc<dyn TrustDecisionProvider>,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, ConnectError> {
        let anchors = if keystore.is_empty() {
            None
        } else {
            Some(
                WebPkiServerVerifier::builder_with_provider(
                    Arc::new(keystore.roots),
                    provider.clone(),
                )
                .build()
                .map_err(|e| ConnectError::Tls(rustls::Error::General(e.to_string())))?,
            )
        };
        Ok(Self {
            anchors,
            trust,
            provider,
            rejected: Mutex::new(Vec::new()),
        })
    }

    fn take_rejected(&self) -> Vec<Certificate> {
        std::mem::take(&mut *self.rejected.lock())
    }
}

impl fmt::Debug for RecordingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingVerifier")
            .field("has_anchors", &self.anchors.is_some())
            .field("rejected", &self.rejected.lock().len())
            .finish()
    }
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<Certificate> = std::iter::once(end_entity)
            .chain(intermediates)
            .map(|der| Certificate::from_der(der.to_vec()))
            .collect();

        if self.trust.is_accepted(&chain) {
            debug!("Server chain was accepted earlier");
            return Ok(ServerCertVerified::assertion());
        }

        let result = match &self.anchors {
            Some(anchors) => anchors.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
            None => Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )),
        };

        if result.is_err() {
            *self.rejected.lock() = chain;
        }
        result
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustStore;
    use tempfile::TempDir;

    fn self_signed() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap()
    }

    #[test]
    fn test_no_keystore_has_no_anchors() {
        assert!(KeyStore::load(None).unwrap().is_empty());
    }

    #[test]
    fn test_loads_pem_anchors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("trusted.pem");
        let pem = format!("{}{}", self_signed().cert.pem(), self_signed().cert.pem());
        std::fs::write(&path, pem).unwrap();

        assert_eq!(KeyStore::load(Some(&path)).unwrap().len(), 2);
    }

    #[test]
    fn test_missing_keystore_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = KeyStore::load(Some(&tmp.path().join("absent.pem"))).unwrap_err();
        assert!(matches!(err, ConnectError::KeyStore { .. }));
    }

    #[test]
    fn test_verifier_records_unknown_chain() {
        let key = self_signed();
        let verifier = RecordingVerifier::new(
            KeyStore::empty(),
            Arc::new(TrustStore::new()),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .unwrap();

        let server_name = ServerName::try_from("localhost").unwrap();
        let result =
            verifier.verify_server_cert(key.cert.der(), &[], &server_name, &[], UnixTime::now());
        assert!(result.is_err());

        let rejected = verifier.take_rejected();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].der(), &key.cert.der()[..]);
    }

    #[test]
    fn test_verifier_passes_accepted_chain() {
        let key = self_signed();
        let store = TrustStore::new();
        store.accept(&[Certificate::from_der(&key.cert.der()[..])]);
        let verifier = RecordingVerifier::new(
            KeyStore::empty(),
            Arc::new(store),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .unwrap();

        let server_name = ServerName::try_from("localhost").unwrap();
        assert!(verifier
            .verify_server_cert(key.cert.der(), &[], &server_name, &[], UnixTime::now())
            .is_ok());
        assert!(verifier.take_rejected().is_empty());
    }
}
