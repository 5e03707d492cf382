use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

mod negotiation;

pub(crate) const ROOT_CN: &str = "certfetch Test Root";
pub(crate) const INTERMEDIATE_CN: &str = "certfetch Test Intermediate";
pub(crate) const LEAF_CN: &str = "localhost";

/// The crypto provider every test uses, independent of any process default.
pub(crate) fn test_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

pub(crate) fn ensure_global_state() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A freshly generated root, intermediate and leaf, like a small private CA.
///
/// The leaf is valid for `localhost` and `127.0.0.1`.
pub(crate) struct TestPki {
    pub root: CertificateDer<'static>,
    pub intermediate: CertificateDer<'static>,
    pub leaf: CertificateDer<'static>,
    leaf_key: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let root_key = KeyPair::generate().unwrap();
        let mut root_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        root_params.distinguished_name = named(ROOT_CN);
        root_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        root_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let root = root_params.self_signed(&root_key).unwrap();

        let intermediate_key = KeyPair::generate().unwrap();
        let mut intermediate_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        intermediate_params.distinguished_name = named(INTERMEDIATE_CN);
        intermediate_params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        intermediate_params.key_usages =
            vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let intermediate = intermediate_params
            .signed_by(&intermediate_key, &root, &root_key)
            .unwrap();

        let leaf_key = KeyPair::generate().unwrap();
        let mut leaf_params = CertificateParams::new(vec![LEAF_CN.to_owned()]).unwrap();
        leaf_params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        leaf_params.distinguished_name = named(LEAF_CN);
        leaf_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf = leaf_params
            .signed_by(&leaf_key, &intermediate, &intermediate_key)
            .unwrap();

        Self {
            root: root.der().clone(),
            intermediate: intermediate.der().clone(),
            leaf: leaf.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    /// The chain a correctly configured server presents.
    pub fn server_chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.leaf.clone(), self.intermediate.clone()]
    }

    pub fn leaf_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.clone()))
    }
}

fn named(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn
}

/// Self-signs a certificate with the given subject CN and SAN DNS names.
///
/// `None` leaves the subject empty.
pub(crate) fn self_signed(common_name: Option<&str>, dns_names: &[&str]) -> CertificateDer<'static> {
    let key = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(dns_names.iter().map(|name| (*name).to_owned()).collect::<Vec<_>>())
            .unwrap();
    params.distinguished_name = match common_name {
        Some(cn) => named(cn),
        None => DistinguishedName::new(),
    };
    params.self_signed(&key).unwrap().der().clone()
}

/// Reads one `\n`-terminated line, without the line ending.
pub(crate) fn read_line<R: Read>(stream: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Counts the PEM certificate blocks in `pem`.
pub(crate) fn pem_blocks(pem: &str) -> Vec<String> {
    pem.split("-----END CERTIFICATE-----\n")
        .filter(|block| !block.trim().is_empty())
        .map(|block| format!("{}-----END CERTIFICATE-----\n", block.trim_start_matches('\n')))
        .collect()
}
