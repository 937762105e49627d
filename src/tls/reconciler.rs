//! Applies configuration snapshots to the static entry points.
//!
//! # Responsibilities
//! - Determine which entry points a snapshot is authoritative for
//! - Skip entry points whose declared TLS entries did not change
//! - Rebuild Store + Policy for the rest and install them
//! - Keep failures local to the entry point that produced them
//!
//! # Design Decisions
//! - Applications are serialized; a snapshot older than the last applied one is dropped
//! - All material for an entry point parses before anything is installed
//! - Synchronous: callers run it on a blocking worker

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use super::client_auth::ClientAuthPolicy;
use super::error::{MaterialError, ReconcileError, ReconfigureError};
use super::manager::EntryPointTlsManager;
use super::material::{Certificate, FileOrContent};
use super::snapshot::{ConfigurationSnapshot, TlsEntry};
use super::store::CertificateStore;
use crate::config::schema::EntryPointConfig;
use crate::observability::metrics;

/// Outcome of one snapshot application.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub revision: u64,
    /// The snapshot was older than the last applied one and was dropped.
    pub stale: bool,
    /// Entry points that were swapped, with their new generation.
    pub updated: Vec<(String, u64)>,
    /// Entry points in scope whose declaration did not change.
    pub unchanged: Vec<String>,
    /// Entry points that kept their previous state because of an error.
    pub failed: Vec<ReconcileError>,
    /// Names in the snapshot that match no static entry point.
    pub ignored: Vec<String>,
}

impl ReconcileReport {
    fn stale(revision: u64) -> Self {
        Self {
            revision,
            stale: true,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct AppliedState {
    last_revision: Option<u64>,
    /// Declared entries last installed successfully, per entry point.
    entries: HashMap<String, Vec<TlsEntry>>,
}

/// Owner of the static entry point managers.
pub struct Reconciler {
    managers: BTreeMap<String, Arc<EntryPointTlsManager>>,
    fallback: Arc<Certificate>,
    applied: Mutex<AppliedState>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("entry_points", &self.managers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Reconciler {
    /// Create one manager per static entry point, each serving only `fallback`.
    pub fn new(
        entry_points: &[EntryPointConfig],
        fallback: Arc<Certificate>,
    ) -> Result<Self, ReconfigureError> {
        let mut managers = BTreeMap::new();
        let mut entries = HashMap::new();

        for ep in entry_points {
            let manager = EntryPointTlsManager::new(
                ep.name.clone(),
                &ep.alpn_protocols,
                CertificateStore::empty(fallback.clone()),
                ClientAuthPolicy::none(),
            )?;
            managers.insert(ep.name.clone(), Arc::new(manager));
            entries.insert(ep.name.clone(), Vec::new());
        }

        Ok(Self {
            managers,
            fallback,
            applied: Mutex::new(AppliedState {
                last_revision: None,
                entries,
            }),
        })
    }

    pub fn manager(&self, name: &str) -> Option<&Arc<EntryPointTlsManager>> {
        self.managers.get(name)
    }

    /// Managers in name order.
    pub fn managers(&self) -> impl Iterator<Item = &Arc<EntryPointTlsManager>> {
        self.managers.values()
    }

    pub fn last_revision(&self) -> Option<u64> {
        self.lock().last_revision
    }

    /// Apply the boot-time snapshot. Any per-entry-point failure is returned.
    pub fn bootstrap(&self, snapshot: &ConfigurationSnapshot) -> Result<ReconcileReport, ReconcileError> {
        let mut report = self.apply(snapshot);
        if report.failed.is_empty() {
            return Ok(report);
        }
        Err(report.failed.remove(0))
    }

    /// Apply a snapshot pushed by a provider.
    pub fn apply(&self, snapshot: &ConfigurationSnapshot) -> ReconcileReport {
        let mut applied = self.lock();

        if let Some(last) = applied.last_revision {
            if snapshot.revision < last {
                tracing::warn!(
                    revision = snapshot.revision,
                    last_revision = last,
                    "Dropping stale configuration snapshot"
                );
                return ReconcileReport::stale(snapshot.revision);
            }
        }

        let mut report = ReconcileReport {
            revision: snapshot.revision,
            ..ReconcileReport::default()
        };

        let scope = snapshot.scope(self.managers.keys().map(String::as_str));
        for name in scope {
            if !self.managers.contains_key(&name) {
                tracing::warn!(
                    entry_point = %name,
                    revision = snapshot.revision,
                    "Snapshot names an unknown entry point, ignoring"
                );
                report.ignored.push(name);
                continue;
            }

            let declared = snapshot.entries_for(&name);
            if applied.entries.get(&name) == Some(&declared) {
                report.unchanged.push(name);
                continue;
            }

            self.install(&name, declared, &mut applied, &mut report);
        }

        applied.last_revision = Some(snapshot.revision);
        log_report(&report);
        report
    }

    /// Rebuild every entry point from its current declaration, re-reading all files.
    pub fn reload(&self) -> ReconcileReport {
        let mut applied = self.lock();
        let mut report = ReconcileReport {
            revision: applied.last_revision.unwrap_or_default(),
            ..ReconcileReport::default()
        };

        for name in self.managers.keys() {
            let declared = applied.entries.get(name).cloned().unwrap_or_default();
            self.install(name, declared, &mut applied, &mut report);
        }

        log_report(&report);
        report
    }

    fn install(
        &self,
        name: &str,
        declared: Vec<TlsEntry>,
        applied: &mut AppliedState,
        report: &mut ReconcileReport,
    ) {
        let Some(manager) = self.managers.get(name) else {
            report
                .failed
                .push(ReconcileError::UnknownEntryPoint(name.to_string()));
            return;
        };

        let result = build_state(&declared, &self.fallback)
            .map_err(|source| ReconcileError::Material {
                entry_point: name.to_string(),
                source,
            })
            .and_then(|(store, policy)| {
                manager
                    .reconfigure(store, policy)
                    .map_err(ReconcileError::from)
            });

        match result {
            Ok(generation) => {
                metrics::record_reconfiguration(name, "success");
                applied.entries.insert(name.to_string(), declared);
                report.updated.push((name.to_string(), generation));
            }
            Err(e) => {
                metrics::record_reconfiguration(name, "failure");
                tracing::error!(
                    entry_point = %name,
                    revision = report.revision,
                    generation = manager.generation(),
                    error = %e,
                    "TLS reconfiguration failed, keeping previous configuration"
                );
                report.failed.push(e);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppliedState> {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse every declared certificate and CA source into a new Store and Policy.
fn build_state(
    declared: &[TlsEntry],
    fallback: &Arc<Certificate>,
) -> Result<(CertificateStore, ClientAuthPolicy), MaterialError> {
    let certificates = declared
        .iter()
        .map(|entry| Certificate::parse(&entry.certificate.cert_file, &entry.certificate.key_file))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ca_sources: Vec<FileOrContent> = Vec::new();
    let mut required = false;
    for auth in declared.iter().filter_map(|entry| entry.client_auth.as_ref()) {
        required |= auth.required;
        for source in &auth.ca_files {
            if !ca_sources.contains(source) {
                ca_sources.push(source.clone());
            }
        }
    }

    let policy = ClientAuthPolicy::build(&ca_sources, required)?;
    let store = CertificateStore::build(certificates, fallback.clone());
    Ok((store, policy))
}

fn log_report(report: &ReconcileReport) {
    if report.is_success() {
        tracing::info!(
            revision = report.revision,
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            ignored = report.ignored.len(),
            "Configuration snapshot applied"
        );
    } else {
        tracing::warn!(
            revision = report.revision,
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "Configuration snapshot partially applied"
        );
    }
}
