use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can end a fetch.
///
/// Every variant is terminal for the invocation that produced it; nothing is
/// retried internally.
#[allow(missing_docs)] // variant fields are described by the messages
#[derive(Error, Debug)]
pub enum Error {
    /// The target string could not be turned into a host, port and scheme.
    #[error("invalid target `{target}`: {reason}")]
    TargetResolution { target: String, reason: String },

    /// TCP connect failed or timed out.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// The plaintext STARTTLS exchange failed.
    #[error("{protocol} STARTTLS negotiation failed: {reason}")]
    Negotiation {
        protocol: &'static str,
        reason: String,
    },

    /// The TLS handshake failed, including certificate verification.
    #[error("TLS handshake with {host} failed: {reason}")]
    TlsHandshake { host: String, reason: String },

    /// The handshake completed but the peer presented no certificates.
    #[error("no certificates found")]
    NoCertificatesFound,

    /// Creating or writing an output file failed.
    #[error("failed to write {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn target(target: &str, reason: impl Into<String>) -> Self {
        Self::TargetResolution {
            target: target.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn negotiation(protocol: &'static str, reason: impl Into<String>) -> Self {
        Self::Negotiation {
            protocol,
            reason: reason.into(),
        }
    }

    pub(crate) fn handshake(host: &str, reason: impl ToString) -> Self {
        Self::TlsHandshake {
            host: host.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn file_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }
}

pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
