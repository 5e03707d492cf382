//! Certificate records derived from the chain a peer presented.

use rustls::pki_types::CertificateDer;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::error::{Error, Result};

/// One certificate from the peer's chain, with the names we derive filenames from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: CertificateDer<'static>,
    common_name: Option<String>,
    dns_names: Vec<String>,
}

impl Certificate {
    /// Parses the subject common name and SAN DNS names out of `der`.
    ///
    /// No signature or validity checks happen here. A certificate that cannot
    /// be parsed is kept without names so its bytes are still saved.
    pub fn from_der(der: CertificateDer<'static>) -> Self {
        let (common_name, dns_names) = match parse_x509_certificate(der.as_ref()) {
            Ok((_, cert)) => {
                let common_name = cert
                    .subject()
                    .iter_common_name()
                    .next()
                    .and_then(|cn| cn.as_str().ok())
                    .map(str::to_owned);

                let dns_names = match cert.subject_alternative_name() {
                    Ok(Some(san)) => san
                        .value
                        .general_names
                        .iter()
                        .filter_map(|name| match name {
                            GeneralName::DNSName(dns) => Some((*dns).to_owned()),
                            _ => None,
                        })
                        .collect(),
                    Ok(None) => Vec::new(),
                    Err(e) => {
                        log::warn!("ignoring malformed subjectAltName extension: {e}");
                        Vec::new()
                    }
                };
                (common_name, dns_names)
            }
            Err(e) => {
                log::warn!("could not parse certificate, saving it without names: {e}");
                (None, Vec::new())
            }
        };

        Self {
            der,
            common_name,
            dns_names,
        }
    }

    /// The certificate exactly as received.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// First subject CN, if present and valid UTF-8.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// SAN DNS names, in certificate order.
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }
}

/// The certificates a peer presented, leaf first.
///
/// Kept in the order received; never sorted, deduplicated or checked against a
/// trust path. Always holds at least one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
}

impl CertificateChain {
    /// Builds the chain from the raw certificates of a completed handshake.
    ///
    /// `None` and an empty list both mean the peer sent nothing, which is
    /// reported as [`Error::NoCertificatesFound`].
    pub fn extract(presented: Option<&[CertificateDer<'_>]>) -> Result<Self> {
        let certificates: Vec<Certificate> = presented
            .unwrap_or_default()
            .iter()
            .map(|der| Certificate::from_der(der.clone().into_owned()))
            .collect();

        if certificates.is_empty() {
            return Err(Error::NoCertificatesFound);
        }

        for (i, cert) in certificates.iter().enumerate() {
            log::debug!(
                "certificate {}: CN={:?} SAN={:?}",
                i + 1,
                cert.common_name(),
                cert.dns_names()
            );
        }

        Ok(Self { certificates })
    }

    /// The leaf (server) certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.certificates[0]
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false; an empty chain is never constructed.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates leaf first.
    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.certificates.iter()
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
