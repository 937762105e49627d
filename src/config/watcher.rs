//! Dynamic provider: turns a watched TOML file into configuration snapshots.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_snapshot, ConfigError};
use crate::tls::ConfigurationSnapshot;

/// Watches the provider file and emits a snapshot on every change.
pub struct SnapshotWatcher {
    path: PathBuf,
    poll_interval: Duration,
    revision: Arc<AtomicU64>,
    update_tx: mpsc::UnboundedSender<ConfigurationSnapshot>,
}

impl SnapshotWatcher {
    /// Create a new SnapshotWatcher.
    ///
    /// Returns the watcher and a receiver for snapshots.
    pub fn new(
        path: &Path,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ConfigurationSnapshot>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                poll_interval,
                revision: Arc::new(AtomicU64::new(0)),
                update_tx,
            },
            update_rx,
        )
    }

    /// Read the file once, for boot.
    pub fn load_initial(&self) -> Result<ConfigurationSnapshot, ConfigError> {
        load_snapshot(&self.path, next_revision(&self.revision))
    }

    /// Start watching in a background thread. Dropping the returned watcher stops it.
    ///
    /// The parent directory is watched so editors that replace the file
    /// (write to a temp file, then rename) are still observed.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();
        let revision = self.revision.clone();
        let file_name = self.path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let concerns_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !concerns_file {
                        return;
                    }

                    tracing::debug!(path = ?path, kind = ?event.kind, "Provider file change detected");
                    match load_snapshot(&path, next_revision(&revision)) {
                        Ok(snapshot) => {
                            if tx.send(snapshot).is_err() {
                                tracing::debug!("Snapshot receiver dropped");
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                path = ?path,
                                error = %e,
                                "Failed to read provider file, keeping current TLS configuration"
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        let watch_root = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&watch_root, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Provider watcher started");
        Ok(watcher)
    }
}

fn next_revision(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}
