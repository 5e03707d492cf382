use super::log_server_cert;
use once_cell::sync::OnceCell;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types;
use rustls::{
    crypto::CryptoProvider, DigitallySignedStruct, Error as TlsError, OtherError, SignatureScheme,
};
use std::sync::Arc;

/// A TLS certificate verifier that uses the system's root store and WebPKI.
#[derive(Debug)]
pub struct Verifier {
    // Native roots are only loaded once the first certificate needs checking,
    // so an insecure or failed-before-handshake fetch never touches the store.
    inner: OnceCell<Arc<WebPkiServerVerifier>>,

    // Extra trust anchors to add to the verifier above and beyond those provided by the
    // platform via rustls-native-certs.
    extra_roots: Vec<pki_types::TrustAnchor<'static>>,

    crypto_provider: Arc<CryptoProvider>,
}

impl Verifier {
    /// Creates a new verifier whose certificate validation is provided by
    /// WebPKI, using root certificates provided by the platform.
    pub fn new(crypto_provider: Arc<CryptoProvider>) -> Self {
        Self {
            inner: OnceCell::new(),
            extra_roots: Vec::new(),
            crypto_provider,
        }
    }

    /// Chainable setter adding trust anchors on top of the platform roots.
    ///
    /// Certificates that cannot be used as a trust anchor are logged and skipped.
    pub fn with_extra_roots(
        mut self,
        roots: impl IntoIterator<Item = pki_types::CertificateDer<'static>>,
    ) -> Self {
        for root in roots {
            match webpki::anchor_from_trusted_cert(&root) {
                Ok(anchor) => self.extra_roots.push(anchor.to_owned()),
                Err(e) => log::warn!("Ignoring unusable extra root certificate: {e}"),
            }
        }
        self
    }

    fn get_or_init_verifier(&self) -> Result<&Arc<WebPkiServerVerifier>, TlsError> {
        self.inner.get_or_try_init(|| self.init_verifier())
    }

    // Attempt to load CA root certificates present on the system, on top of any extra roots.
    fn init_verifier(&self) -> Result<Arc<WebPkiServerVerifier>, TlsError> {
        let mut root_store = rustls::RootCertStore::empty();

        if !self.extra_roots.is_empty() {
            let count = self.extra_roots.len();
            root_store.extend(self.extra_roots.iter().cloned());
            log::debug!(
                "Loaded {count} extra CA certificates in addition to possible system roots",
            );
        }

        let result = rustls_native_certs::load_native_certs();
        let (added, ignored) = root_store.add_parsable_certificates(result.certs);
        if ignored != 0 {
            log::warn!("Some CA root certificates were ignored due to errors");
        }

        for error in result.errors {
            log::warn!("Error loading CA root certificate: {error}");
        }

        // Extra roots alone are enough to verify a private CA, so only an entirely
        // empty store is fatal.
        if root_store.is_empty() {
            return Err(TlsError::General(
                "No CA certificates were loaded from the system".to_owned(),
            ));
        } else {
            log::debug!("Loaded {added} CA certificates from the system");
        }

        WebPkiServerVerifier::builder_with_provider(
            root_store.into(),
            Arc::clone(&self.crypto_provider),
        )
        .build()
        .map_err(|e| TlsError::Other(OtherError(Arc::new(e))))
    }
}

impl ServerCertVerifier for Verifier {
    fn verify_server_cert(
        &self,
        end_entity: &pki_types::CertificateDer<'_>,
        intermediates: &[pki_types::CertificateDer<'_>],
        server_name: &pki_types::ServerName,
        ocsp_response: &[u8],
        now: pki_types::UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        log_server_cert(end_entity);

        self.get_or_init_verifier()?
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            .map_err(|e| {
                log::error!("failed to verify TLS certificate: {}", e);
                e
            })
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.get_or_init_verifier()?
            .verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &pki_types::CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.get_or_init_verifier()?
            .verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        // The wrapped `WebPkiServerVerifier` is built from the same provider, so the
        // schemes are identical without forcing the root store to load.
        self.crypto_provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
