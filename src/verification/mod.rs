use rustls::client::danger::ServerCertVerifier;
use rustls::client::WantsClientCert;
use rustls::{ClientConfig, ConfigBuilder, WantsVerifier};
use std::sync::Arc;

use crate::config::Config;

mod insecure;
pub use insecure::AcceptAnyCertificate;

mod platform;
pub use platform::Verifier;

// Log the certificate we are verifying so that we can try and find what may be wrong with it
// if we need to debug a user's situation.
fn log_server_cert(_end_entity: &rustls::pki_types::CertificateDer<'_>) {
    #[cfg(feature = "cert-logging")]
    {
        use base64::Engine;
        log::debug!(
            "verifying certificate: {}",
            base64::engine::general_purpose::STANDARD.encode(_end_entity.as_ref())
        );
    }
}

/// Picks the verifier a fetch with `config` should use.
///
/// Verification against the platform roots (plus any extra roots) unless the
/// config asks for an insecure fetch.
pub fn verifier_for(config: &Config) -> Arc<dyn ServerCertVerifier> {
    let provider = config.provider();
    if config.insecure() {
        log::warn!("certificate verification is disabled");
        Arc::new(AcceptAnyCertificate::new(provider))
    } else {
        Arc::new(Verifier::new(provider).with_extra_roots(config.extra_roots.iter().cloned()))
    }
}

/// Extension trait to help configure [`ClientConfig`]s for a fetch.
pub trait BuilderVerifierExt {
    /// Configures the `ClientConfig` with the verifier selected by `config`.
    ///
    /// ```rust
    /// use certfetch::{BuilderVerifierExt, Config};
    /// use rustls::ClientConfig;
    ///
    /// let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
    /// let config = ClientConfig::builder_with_provider(provider)
    ///     .with_safe_default_protocol_versions()
    ///     .unwrap()
    ///     .with_fetch_verifier(&Config::new().with_insecure(true))
    ///     .with_no_client_auth();
    /// ```
    fn with_fetch_verifier(self, config: &Config) -> ConfigBuilder<ClientConfig, WantsClientCert>;
}

impl BuilderVerifierExt for ConfigBuilder<ClientConfig, WantsVerifier> {
    fn with_fetch_verifier(self, config: &Config) -> ConfigBuilder<ClientConfig, WantsClientCert> {
        self.dangerous()
            .with_custom_certificate_verifier(verifier_for(config))
    }
}
