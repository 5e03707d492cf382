#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs)]
//! Retrieve the certificate chain a TLS server presents and save it as PEM.
//!
//! A fetch resolves a loose target string (`host`, `host:port` or
//! `scheme://host[:port]`), performs the plaintext STARTTLS exchange for
//! `smtp`, `imap` and `pop3`, completes the TLS handshake with `rustls`, and
//! writes the chain to `<host>_bundle.pem` plus one `.crt` file per
//! certificate.
//!
//! ```no_run
//! use certfetch::Config;
//!
//! let report = certfetch::fetch("smtp://mail.example.com", &Config::new())?;
//! println!("{} certificate(s) in {}", report.chain.len(), report.written.bundle.display());
//! # Ok::<(), certfetch::Error>(())
//! ```

use rustls::pki_types::CertificateDer;

pub mod bundle;
pub mod chain;
mod config;
mod error;
pub mod negotiate;
pub mod session;
pub mod target;
mod verification;

pub use bundle::{BundleWriter, WriteReport};
pub use chain::{Certificate, CertificateChain};
pub use config::{Config, DEFAULT_TIMEOUT};
pub use error::{Error, Result};
pub use session::Session;
pub use target::{Scheme, Target};
pub use verification::{verifier_for, AcceptAnyCertificate, BuilderVerifierExt, Verifier};

/// Fixtures and tests covering every stage of a fetch.
#[cfg(test)]
mod tests;

/// Everything a successful fetch produced.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Where the certificates came from.
    pub target: Target,
    /// The chain as presented, leaf first.
    pub chain: CertificateChain,
    /// The files written for it.
    pub written: WriteReport,
}

/// Runs one complete fetch: resolve, negotiate, handshake, extract, write.
///
/// Every stage runs once; the first failure ends the fetch.
pub fn fetch(target: &str, config: &Config) -> Result<FetchReport> {
    let target = Target::resolve(target)?;
    log::debug!("fetching certificates from {target}");

    let session = Session::establish(&target, config)?;
    save(target, session.peer_certificates(), config)
}

/// Extracts and writes a chain already obtained from a handshake with `target`.
///
/// An absent or empty chain is [`Error::NoCertificatesFound`] and nothing is
/// written.
pub fn save(
    target: Target,
    presented: Option<&[CertificateDer<'_>]>,
    config: &Config,
) -> Result<FetchReport> {
    let chain = CertificateChain::extract(presented)?;
    let written = BundleWriter::new(config.output_dir()).write(target.host(), &chain)?;
    Ok(FetchReport {
        target,
        chain,
        written,
    })
}
