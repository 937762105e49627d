//! Desired TLS configuration pushed by a provider.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::material::FileOrContent;

/// Point-in-time desired TLS state.
///
/// Deserializes from the provider file format:
///
/// ```toml
/// entry_points = ["websecure"]
///
/// [[tls]]
/// entry_points = ["websecure"]
/// certificate = { cert_file = "/etc/certs/a.pem", key_file = "/etc/certs/a.key" }
/// client_auth = { ca_files = ["/etc/certs/ca.pem"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigurationSnapshot {
    /// Assigned by the provider; not part of the file format.
    #[serde(skip)]
    pub revision: u64,

    /// Entry points this snapshot is authoritative for, beyond those its entries name.
    #[serde(default)]
    pub entry_points: BTreeSet<String>,

    /// TLS entries in configuration order.
    #[serde(default)]
    pub tls: Vec<TlsEntry>,

    /// The snapshot is the complete desired state for every static entry point.
    #[serde(skip)]
    pub authoritative: bool,
}

impl ConfigurationSnapshot {
    pub fn new(revision: u64, tls: Vec<TlsEntry>) -> Self {
        Self {
            revision,
            entry_points: BTreeSet::new(),
            tls,
            authoritative: false,
        }
    }

    /// Mark the snapshot as covering every static entry point, named or not.
    pub fn authoritative(mut self) -> Self {
        self.authoritative = true;
        self
    }

    pub fn with_entry_points<I, S>(mut self, entry_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_points = entry_points.into_iter().map(Into::into).collect();
        self
    }

    /// True for the "no TLS configuration at all" snapshot (e.g. an emptied file).
    pub fn is_blank(&self) -> bool {
        self.entry_points.is_empty() && self.tls.is_empty()
    }

    /// Entry points this snapshot speaks for, resolved against the static set.
    ///
    /// An authoritative or blank snapshot, or an entry that names no entry
    /// point, covers all of them.
    pub fn scope<'a>(&self, static_entry_points: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let covers_all = self.authoritative
            || self.is_blank()
            || self.tls.iter().any(|e| e.entry_points.is_empty());
        if covers_all {
            return static_entry_points.into_iter().map(str::to_string).collect();
        }

        let mut scope = self.entry_points.clone();
        for entry in &self.tls {
            scope.extend(entry.entry_points.iter().cloned());
        }
        scope
    }

    /// Entries that apply to one entry point, in configuration order.
    pub fn entries_for(&self, entry_point: &str) -> Vec<TlsEntry> {
        self.tls
            .iter()
            .filter(|entry| entry.applies_to(entry_point))
            .cloned()
            .collect()
    }
}

/// One certificate, optionally with client CAs, bound to a set of entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsEntry {
    /// Entry points the entry applies to. Empty means every entry point.
    #[serde(default)]
    pub entry_points: Vec<String>,

    pub certificate: TlsCertificateConfig,

    #[serde(default)]
    pub client_auth: Option<ClientAuthConfig>,
}

impl TlsEntry {
    pub fn applies_to(&self, entry_point: &str) -> bool {
        self.entry_points.is_empty() || self.entry_points.iter().any(|name| name == entry_point)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsCertificateConfig {
    pub cert_file: FileOrContent,
    pub key_file: FileOrContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientAuthConfig {
    /// CA sources whose certificates are unioned into one trust pool.
    #[serde(default)]
    pub ca_files: Vec<FileOrContent>,

    /// Reject clients that present no certificate.
    #[serde(default)]
    pub required: bool,
}
