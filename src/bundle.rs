//! Writing a chain to disk as a PEM bundle plus one file per certificate.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::chain::{Certificate, CertificateChain};
use crate::error::{Error, Result};

const PEM_LABEL: &str = "CERTIFICATE";
const PEM_LINE_WIDTH: usize = 64;

/// What a [`BundleWriter`] put on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// The combined bundle, always written.
    pub bundle: PathBuf,
    /// Individual certificate files created by this run, in chain order.
    pub saved: Vec<PathBuf>,
    /// Individual certificate files left alone because they already existed.
    pub skipped: Vec<PathBuf>,
}

/// Writes chains into a single output directory.
#[derive(Debug, Clone)]
pub struct BundleWriter {
    dir: PathBuf,
}

impl BundleWriter {
    /// Writes into `dir`, which must already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `<host>_bundle.pem` and one `.crt` file per certificate.
    ///
    /// The bundle is replaced if present. Individual files are never
    /// overwritten: an existing file is reported in [`WriteReport::skipped`]
    /// and the run carries on.
    pub fn write(&self, host: &str, chain: &CertificateChain) -> Result<WriteReport> {
        let bundle = self.dir.join(bundle_file_name(host));
        let contents = chain
            .iter()
            .map(|cert| encode_pem(cert.der()))
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&bundle, contents).map_err(|e| Error::file_write(&bundle, e))?;
        log::debug!(
            "wrote {} certificate(s) to {}",
            chain.len(),
            bundle.display()
        );

        let mut report = WriteReport {
            bundle,
            ..WriteReport::default()
        };

        for (i, cert) in chain.iter().enumerate() {
            let path = self.dir.join(file_name(cert, i + 1));
            match create_new(&path, encode_pem(cert.der()).as_bytes()) {
                Ok(()) => report.saved.push(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    log::warn!("{} already exists, not overwriting it", path.display());
                    report.skipped.push(path);
                }
                Err(e) => return Err(Error::file_write(path, e)),
            }
        }

        Ok(report)
    }
}

fn create_new(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Name of the combined bundle for `host`.
pub fn bundle_file_name(host: &str) -> String {
    format!("{}_bundle.pem", sanitize(host))
}

/// Derives the individual file name for the certificate at 1-based `index`.
///
/// Uses the common name, then the first SAN DNS name, then `cert_<index>`.
pub fn file_name(cert: &Certificate, index: usize) -> String {
    let name = cert
        .common_name()
        .filter(|cn| !cn.is_empty())
        .or_else(|| {
            cert.dns_names()
                .first()
                .map(String::as_str)
                .filter(|dns| !dns.is_empty())
        });

    match name {
        Some(name) => format!("{}.crt", sanitize(name)),
        None => format!("cert_{index}.crt"),
    }
}

/// Makes `name` safe to use as a file name.
///
/// A leading `*.` wildcard label is dropped and every character outside
/// `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize(name: &str) -> String {
    name.strip_prefix("*.")
        .unwrap_or(name)
        .chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

/// Encodes one certificate as a PEM block, including the trailing newline.
pub fn encode_pem(der: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {PEM_LABEL}-----\n");
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII, so every chunk is valid UTF-8.
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {PEM_LABEL}-----\n"));
    pem
}
