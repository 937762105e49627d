//! Certificate material: PEM sources, key pairs, and CA bundles.
//!
//! # Responsibilities
//! - Resolve a source that is either inline PEM or a file path
//! - Parse certificate chain + private key into a signing `CertifiedKey`
//! - Reject keys that do not belong to their certificate
//! - Derive the hostnames a certificate is valid for (CN + DNS SANs)
//! - Merge any number of CA sources into one trust pool

use std::fmt;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use serde::{Deserialize, Serialize};
use x509_parser::extensions::GeneralName;

use super::crypto_provider;
use super::error::MaterialError;
use super::store::normalize_hostname;

const PEM_MARKER: &str = "-----BEGIN";
const FALLBACK_COMMON_NAME: &str = "SNI Gateway Default Certificate";

/// A PEM source given either inline or as a path to a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileOrContent(String);

impl FileOrContent {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// True when the value is PEM text rather than a path.
    pub fn is_inline(&self) -> bool {
        self.0.contains(PEM_MARKER)
    }

    /// Name used in logs and errors. Inline content is never echoed.
    pub fn display_name(&self) -> String {
        if self.is_inline() {
            "inline content".to_string()
        } else {
            format!("'{}'", self.0)
        }
    }

    /// Resolve to canonical PEM bytes.
    pub fn read(&self) -> Result<Vec<u8>, MaterialError> {
        if self.is_inline() {
            return Ok(self.0.as_bytes().to_vec());
        }
        std::fs::read(&self.0).map_err(|source| MaterialError::Read {
            source_name: self.0.clone(),
            source,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FileOrContent {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for FileOrContent {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FileOrContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

/// A parsed certificate chain with its signing key and derived names.
pub struct Certificate {
    certified_key: Arc<CertifiedKey>,
    /// Lower-cased CN and DNS SANs in certificate order, deduplicated.
    hostnames: Vec<String>,
    subject: String,
    /// Unix timestamp of the leaf's notAfter.
    not_after: i64,
    fallback: bool,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("hostnames", &self.hostnames)
            .field("chain_len", &self.certified_key.cert.len())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl Certificate {
    /// Parse a certificate chain and private key from their sources.
    pub fn parse(cert: &FileOrContent, key: &FileOrContent) -> Result<Self, MaterialError> {
        let cert_name = cert.display_name();
        let chain = parse_certificates(&cert.read()?, &cert_name)?;
        if chain.is_empty() {
            return Err(MaterialError::NoCertificate {
                source_name: cert_name,
            });
        }
        let private_key = parse_private_key(&key.read()?, &key.display_name())?;
        Self::from_der(chain, private_key, &cert_name)
    }

    /// Build from already decoded DER material.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
        source_name: &str,
    ) -> Result<Self, MaterialError> {
        let leaf = chain.first().ok_or_else(|| MaterialError::NoCertificate {
            source_name: source_name.to_string(),
        })?;
        let (_, parsed) =
            x509_parser::parse_x509_certificate(leaf.as_ref()).map_err(|e| {
                MaterialError::Malformed {
                    source_name: source_name.to_string(),
                    message: e.to_string(),
                }
            })?;

        let subject = parsed.subject().to_string();
        let not_after = parsed.validity().not_after.timestamp();
        let hostnames = certificate_hostnames(&parsed);

        let signing_key = crypto_provider()
            .key_provider
            .load_private_key(private_key)
            .map_err(|e| MaterialError::UnsupportedKey {
                source_name: source_name.to_string(),
                message: e.to_string(),
            })?;
        let certified_key = CertifiedKey::new(chain, signing_key);

        match certified_key.keys_match() {
            Ok(()) => {}
            // Some key types cannot report their public half; accept them.
            Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {}
            Err(_) => {
                return Err(MaterialError::KeyMismatch {
                    source_name: source_name.to_string(),
                })
            }
        }

        Ok(Self {
            certified_key: Arc::new(certified_key),
            hostnames,
            subject,
            not_after,
            fallback: false,
        })
    }

    /// Generate the self-signed certificate served when nothing else is configured.
    ///
    /// It carries no SAN and a CN that is not a hostname, so it never matches SNI.
    pub fn self_signed_fallback() -> Result<Self, MaterialError> {
        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| MaterialError::Fallback(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, FALLBACK_COMMON_NAME);
        params.distinguished_name = dn;

        let key_pair = KeyPair::generate().map_err(|e| MaterialError::Fallback(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| MaterialError::Fallback(e.to_string()))?;
        let private_key =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let mut certificate =
            Self::from_der(vec![cert.der().clone()], private_key, "generated fallback")?;
        certificate.fallback = true;
        tracing::debug!(subject = %certificate.subject, "Generated fallback certificate");
        Ok(certificate)
    }

    pub fn certified_key(&self) -> &Arc<CertifiedKey> {
        &self.certified_key
    }

    /// The leaf certificate presented first in the chain.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.certified_key.cert[0]
    }

    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    /// True for the generated self-signed default.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Whether this certificate is valid for `hostname` (exact or single-label wildcard).
    pub fn covers(&self, hostname: &str) -> bool {
        let hostname = normalize_hostname(hostname);
        self.hostnames.iter().any(|name| {
            if *name == hostname {
                return true;
            }
            match (name.strip_prefix("*."), hostname.split_once('.')) {
                (Some(suffix), Some((label, rest))) => !label.is_empty() && rest == suffix,
                _ => false,
            }
        })
    }
}

/// Merge CA certificates from every source into one trust pool.
///
/// A source without any CERTIFICATE block contributes nothing and is not an error.
pub fn parse_ca_pool(sources: &[FileOrContent]) -> Result<RootCertStore, MaterialError> {
    let mut roots = RootCertStore::empty();
    for source in sources {
        let name = source.display_name();
        let certs = parse_certificates(&source.read()?, &name)?;
        let found = certs.len();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if found == 0 {
            tracing::warn!(source = %name, "CA source contains no certificates");
        } else if ignored > 0 {
            tracing::warn!(source = %name, added, ignored, "Ignored unparsable CA certificates");
        } else {
            tracing::debug!(source = %name, added, "Loaded CA certificates");
        }
    }
    Ok(roots)
}

fn parse_certificates(
    pem: &[u8],
    source_name: &str,
) -> Result<Vec<CertificateDer<'static>>, MaterialError> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MaterialError::Pem {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })
}

fn parse_private_key(pem: &[u8], source_name: &str) -> Result<PrivateKeyDer<'static>, MaterialError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| MaterialError::Pem {
            source_name: source_name.to_string(),
            message: e.to_string(),
        })?
        .ok_or_else(|| MaterialError::NoPrivateKey {
            source_name: source_name.to_string(),
        })
}

fn certificate_hostnames(cert: &x509_parser::certificate::X509Certificate<'_>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let name = normalize_hostname(raw);
        if !name.is_empty() && !name.contains(char::is_whitespace) && !names.contains(&name) {
            names.push(name);
        }
    };

    for cn in cert.subject().iter_common_name() {
        if let Ok(value) = cn.as_str() {
            push(value);
        }
    }
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                push(*dns);
            }
        }
    }
    names
}
