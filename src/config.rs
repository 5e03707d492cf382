use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;

/// Timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a single fetch.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) timeout: Duration,
    pub(crate) insecure: bool,
    pub(crate) output_dir: PathBuf,
    pub(crate) extra_roots: Vec<CertificateDer<'static>>,
    pub(crate) crypto_provider: Option<Arc<CryptoProvider>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            insecure: false,
            output_dir: PathBuf::from("."),
            extra_roots: Vec::new(),
            crypto_provider: None,
        }
    }
}

impl Config {
    /// Same as [`Config::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the TCP connect, every negotiation step and the TLS handshake.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Skips verification of the peer's certificates.
    ///
    /// The chain is still retrieved. Only meant for self-signed or test servers.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Directory the bundle and individual certificate files are written to.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Trust anchors to accept in addition to the platform's root store.
    pub fn with_extra_roots(
        mut self,
        roots: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Self {
        self.extra_roots.extend(roots);
        self
    }

    /// Chainable setter to configure the [`CryptoProvider`] used for the handshake.
    ///
    /// Without one, the process-default provider is used if installed, `ring` otherwise.
    pub fn with_provider(mut self, crypto_provider: Arc<CryptoProvider>) -> Self {
        self.crypto_provider = Some(crypto_provider);
        self
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether verification is skipped.
    pub fn insecure(&self) -> bool {
        self.insecure
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub(crate) fn provider(&self) -> Arc<CryptoProvider> {
        match &self.crypto_provider {
            Some(provider) => Arc::clone(provider),
            None => CryptoProvider::get_default()
                .cloned()
                .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider())),
        }
    }
}
