//! SNI certificate store for one entry point.
//!
//! # Responsibilities
//! - Index certificates by every hostname they cover, in configuration order
//! - Resolve an SNI name: exact, then single-label wildcard, then default
//! - Always hold a default certificate so lookup cannot fail
//!
//! # Design Decisions
//! - Built once per configuration; never mutated afterwards
//! - First registration wins when two certificates claim the same name

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use super::material::Certificate;

/// Lower-case a hostname and drop any trailing root dot.
pub fn normalize_hostname(hostname: &str) -> String {
    hostname.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Immutable hostname → certificate mapping with a mandatory default.
pub struct CertificateStore {
    /// Certificates in configuration order.
    certificates: Vec<Arc<Certificate>>,
    /// Exact names and `*.suffix` patterns → position in `certificates`.
    index: HashMap<String, usize>,
    default: Arc<Certificate>,
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("certificates", &self.certificates.len())
            .field("hostnames", &self.index.len())
            .field("default", &self.default.subject())
            .finish()
    }
}

impl CertificateStore {
    /// Build a store from certificates in configuration order.
    ///
    /// With no certificates, `fallback` becomes the default and nothing is indexed.
    pub fn build(certificates: Vec<Certificate>, fallback: Arc<Certificate>) -> Self {
        let certificates: Vec<Arc<Certificate>> = certificates.into_iter().map(Arc::new).collect();

        let mut index: HashMap<String, usize> = HashMap::new();
        for (position, certificate) in certificates.iter().enumerate() {
            for hostname in certificate.hostnames() {
                if let Some(&winner) = index.get(hostname) {
                    tracing::debug!(
                        hostname = %hostname,
                        kept = %certificates[winner].subject(),
                        ignored = %certificate.subject(),
                        "Hostname already registered by an earlier certificate"
                    );
                    continue;
                }
                index.insert(hostname.clone(), position);
            }
        }

        let default = certificates.first().cloned().unwrap_or(fallback);

        Self {
            certificates,
            index,
            default,
        }
    }

    /// A store that only serves the fallback certificate.
    pub fn empty(fallback: Arc<Certificate>) -> Self {
        Self::build(Vec::new(), fallback)
    }

    /// Find the certificate for an SNI name, without falling back to the default.
    pub fn find(&self, sni: &str) -> Option<&Arc<Certificate>> {
        let hostname = normalize_hostname(sni);
        if hostname.is_empty() {
            return None;
        }

        if let Some(&position) = self.index.get(&hostname) {
            return Some(&self.certificates[position]);
        }

        let (_, parent) = hostname.split_once('.')?;
        if parent.is_empty() {
            return None;
        }
        self.index
            .get(&format!("*.{parent}"))
            .map(|&position| &self.certificates[position])
    }

    /// Resolve an SNI name to the certificate to present. Never fails.
    pub fn lookup(&self, sni: Option<&str>) -> &Arc<Certificate> {
        sni.and_then(|name| self.find(name)).unwrap_or(&self.default)
    }

    pub fn default_certificate(&self) -> &Arc<Certificate> {
        &self.default
    }

    pub fn certificates(&self) -> &[Arc<Certificate>] {
        &self.certificates
    }

    /// Indexed names, sorted.
    pub fn hostnames(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// True when no certificate was configured and the generated default is served.
    pub fn is_fallback(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// rustls certificate resolver bound to one store.
#[derive(Debug)]
pub struct StoreResolver {
    store: Arc<CertificateStore>,
}

impl StoreResolver {
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }
}

impl ResolvesServerCert for StoreResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let sni = client_hello.server_name();
        let certificate = self.store.lookup(sni);
        tracing::trace!(
            sni = ?sni,
            subject = %certificate.subject(),
            "Selected certificate"
        );
        Some(certificate.certified_key().clone())
    }
}
