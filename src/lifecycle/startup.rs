//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the TLS state for every entry point before any socket is bound
//! - Start the dynamic provider and feed its snapshots to the reconciler
//! - Bind listeners and the admin API
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Snapshots are applied one at a time, in arrival order, on a blocking worker
//! - Listeners start last (traffic only when ready)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinError, JoinHandle};

use crate::admin::{self, AdminState};
use crate::config::loader::ConfigError;
use crate::config::watcher::SnapshotWatcher;
use crate::config::GatewayConfig;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, EntryPointListener, ListenerError};
use crate::tls::{
    Certificate, ConfigurationSnapshot, MaterialError, ReconcileError, ReconcileReport, Reconciler,
    ReconfigureError,
};

/// Anything that prevents the gateway from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to generate fallback certificate: {0}")]
    Fallback(#[from] MaterialError),

    #[error(transparent)]
    Manager(#[from] ReconfigureError),

    #[error("initial TLS configuration rejected: {0}")]
    Bootstrap(#[from] ReconcileError),

    #[error("failed to read provider file: {0}")]
    Provider(#[from] ConfigError),

    #[error("failed to watch provider file: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to bind admin API to {address}: {source}")]
    Admin {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running gateway: entry points bound, TLS state live.
pub struct Gateway {
    reconciler: Arc<Reconciler>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    entry_point_addrs: BTreeMap<String, SocketAddr>,
    admin_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
    _watcher: Option<RecommendedWatcher>,
}

impl Gateway {
    /// Build TLS state, then bind every entry point and the admin API.
    pub async fn start(config: GatewayConfig) -> Result<Self, StartupError> {
        let fallback = Arc::new(Certificate::self_signed_fallback()?);
        let reconciler = Arc::new(Reconciler::new(&config.entry_points, fallback)?);
        let tracker = ConnectionTracker::new();
        let shutdown = Shutdown::new();
        let mut tasks = Vec::new();

        // TLS state first; a bad initial configuration is fatal.
        let mut watcher = None;
        match &config.provider.file {
            Some(file) => {
                let (provider, updates) = SnapshotWatcher::new(
                    Path::new(file),
                    Duration::from_secs(config.provider.poll_interval_secs),
                );
                let snapshot = provider.load_initial()?;
                let report = reconciler.bootstrap(&snapshot)?;
                tracing::info!(
                    file = %file,
                    revision = report.revision,
                    updated = report.updated.len(),
                    "Initial TLS configuration loaded from provider"
                );

                if config.provider.watch {
                    watcher = Some(provider.run()?);
                    tasks.push(tokio::spawn(apply_updates(
                        reconciler.clone(),
                        updates,
                        shutdown.subscribe(),
                    )));
                }
            }
            None => {
                let snapshot = ConfigurationSnapshot::new(0, config.tls.clone());
                let report = reconciler.bootstrap(&snapshot)?;
                tracing::info!(
                    entries = config.tls.len(),
                    updated = report.updated.len(),
                    "Static TLS configuration loaded"
                );
            }
        }

        let mut entry_point_addrs = BTreeMap::new();
        for ep in &config.entry_points {
            let Some(manager) = reconciler.manager(&ep.name) else {
                continue;
            };
            let listener = EntryPointListener::bind(ep, manager.clone(), tracker.clone()).await?;
            let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
                entry_point: ep.name.clone(),
                address: ep.address.clone(),
                source,
            })?;
            entry_point_addrs.insert(ep.name.clone(), local_addr);
            tasks.push(tokio::spawn(listener.run(shutdown.subscribe())));
        }

        let mut admin_addr = None;
        if config.admin.enabled {
            let address = config.admin.bind_address.clone();
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| StartupError::Admin {
                    address: address.clone(),
                    source,
                })?;
            admin_addr = listener.local_addr().ok();

            let state = AdminState::new(reconciler.clone(), tracker.clone(), &config.admin.api_key);
            let admin_shutdown = shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = admin::serve(listener, state, admin_shutdown).await {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            }));
        }

        tracing::info!(
            entry_points = entry_point_addrs.len(),
            admin = admin_addr.is_some(),
            "Gateway started"
        );

        Ok(Self {
            reconciler,
            tracker,
            shutdown,
            entry_point_addrs,
            admin_addr,
            tasks,
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
            _watcher: watcher,
        })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Bound address of an entry point (useful with port 0).
    pub fn local_addr(&self, entry_point: &str) -> Option<SocketAddr> {
        self.entry_point_addrs.get(entry_point).copied()
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Apply a snapshot on a blocking worker.
    pub async fn apply(&self, snapshot: ConfigurationSnapshot) -> Result<ReconcileReport, JoinError> {
        let reconciler = self.reconciler.clone();
        tokio::task::spawn_blocking(move || reconciler.apply(&snapshot)).await
    }

    /// Re-read every declared certificate and CA file.
    pub async fn reload(&self) -> Result<ReconcileReport, JoinError> {
        let reconciler = self.reconciler.clone();
        tokio::task::spawn_blocking(move || reconciler.reload()).await
    }

    /// Stop accepting, then wait for connections to drain.
    ///
    /// Returns `false` if connections were still open at the deadline.
    pub async fn shutdown(self) -> bool {
        tracing::info!(
            active_connections = self.tracker.active_count(),
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "Shutting down"
        );
        self.shutdown.trigger();
        // Stops provider events and closes the snapshot channel.
        drop(self._watcher);

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Task ended abnormally during shutdown");
            }
        }

        let drained = self.tracker.wait_for_drain(self.drain_timeout).await;
        if !drained {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Drain timeout reached, closing remaining connections"
            );
        }
        drained
    }
}

/// Apply provider snapshots in arrival order until shutdown.
async fn apply_updates(
    reconciler: Arc<Reconciler>,
    mut updates: mpsc::UnboundedReceiver<ConfigurationSnapshot>,
    mut stop: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop.recv() => break,
            received = updates.recv() => {
                let Some(snapshot) = received else { break };
                let reconciler = reconciler.clone();
                let revision = snapshot.revision;
                match tokio::task::spawn_blocking(move || reconciler.apply(&snapshot)).await {
                    Ok(report) if report.stale => {
                        tracing::debug!(revision, "Stale snapshot skipped");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(revision, error = %e, "Snapshot application panicked"),
                }
            }
        }
    }
}
