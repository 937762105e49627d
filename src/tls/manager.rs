//! Per-entry-point TLS state with atomic hot-swap.
//!
//! # Responsibilities
//! - Hold the active (Store, Policy) pair and the rustls config built from it
//! - Serve lock-free reads on the handshake path
//! - Replace the pair atomically on reconfiguration
//!
//! # Design Decisions
//! - One `ServerConfig` per state: a handshake that loaded generation N
//!   resolves certificates and verifies clients against generation N only
//! - Writers are serialized by a mutex the read path never touches
//! - The listening socket is not owned here; swaps never touch it

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use super::client_auth::ClientAuthPolicy;
use super::crypto_provider;
use super::error::ReconfigureError;
use super::material::Certificate;
use super::store::{CertificateStore, StoreResolver};
use crate::observability::metrics;

/// Immutable snapshot of an entry point's TLS configuration.
pub struct EntryPointTlsState {
    store: Arc<CertificateStore>,
    policy: Arc<ClientAuthPolicy>,
    server_config: Arc<ServerConfig>,
    generation: u64,
}

impl std::fmt::Debug for EntryPointTlsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPointTlsState")
            .field("generation", &self.generation)
            .field("store", &self.store)
            .field("policy", &self.policy)
            .finish()
    }
}

impl EntryPointTlsState {
    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    pub fn policy(&self) -> &Arc<ClientAuthPolicy> {
        &self.policy
    }

    pub fn server_config(&self) -> &Arc<ServerConfig> {
        &self.server_config
    }

    /// Starts at 1 and increases by one per successful reconfiguration.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Acceptor bound to this state's configuration.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }
}

/// Owner of one entry point's swappable TLS state.
pub struct EntryPointTlsManager {
    name: String,
    alpn_protocols: Vec<Vec<u8>>,
    state: ArcSwap<EntryPointTlsState>,
    swap_lock: Mutex<()>,
}

impl std::fmt::Debug for EntryPointTlsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPointTlsManager")
            .field("name", &self.name)
            .field("generation", &self.generation())
            .finish()
    }
}

impl EntryPointTlsManager {
    /// Create a manager whose first generation serves `store` and `policy`.
    pub fn new(
        name: impl Into<String>,
        alpn_protocols: &[String],
        store: CertificateStore,
        policy: ClientAuthPolicy,
    ) -> Result<Self, ReconfigureError> {
        let name = name.into();
        let alpn_protocols: Vec<Vec<u8>> =
            alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect();

        let initial = assemble(&name, &alpn_protocols, Arc::new(store), Arc::new(policy), 1)?;
        metrics::set_tls_generation(&name, 1);

        Ok(Self {
            name,
            alpn_protocols,
            state: ArcSwap::from_pointee(initial),
            swap_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The active state. Lock-free; hold the `Arc` for the whole handshake.
    pub fn current(&self) -> Arc<EntryPointTlsState> {
        self.state.load_full()
    }

    /// Certificate that would be presented for `sni` right now.
    pub fn get_certificate(&self, sni: Option<&str>) -> Arc<Certificate> {
        self.state.load().store.lookup(sni).clone()
    }

    pub fn client_auth_policy(&self) -> Arc<ClientAuthPolicy> {
        self.state.load().policy.clone()
    }

    pub fn generation(&self) -> u64 {
        self.state.load().generation
    }

    /// Acceptor for the next handshake.
    pub fn acceptor(&self) -> TlsAcceptor {
        self.state.load().acceptor()
    }

    /// Atomically replace the active store and policy.
    ///
    /// On error the previous state stays active. Returns the new generation.
    pub fn reconfigure(
        &self,
        store: CertificateStore,
        policy: ClientAuthPolicy,
    ) -> Result<u64, ReconfigureError> {
        let _guard = self.swap_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let generation = self.state.load().generation + 1;
        let next = assemble(
            &self.name,
            &self.alpn_protocols,
            Arc::new(store),
            Arc::new(policy),
            generation,
        )?;

        tracing::info!(
            entry_point = %self.name,
            generation,
            certificates = next.store.len(),
            default = %next.store.default_certificate().subject(),
            client_auth = %next.policy.mode(),
            "TLS configuration swapped"
        );

        self.state.store(Arc::new(next));
        metrics::set_tls_generation(&self.name, generation);

        Ok(generation)
    }
}

fn assemble(
    name: &str,
    alpn_protocols: &[Vec<u8>],
    store: Arc<CertificateStore>,
    policy: Arc<ClientAuthPolicy>,
    generation: u64,
) -> Result<EntryPointTlsState, ReconfigureError> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ReconfigureError::ServerConfig {
            entry_point: name.to_string(),
            message: e.to_string(),
        })?
        .with_client_cert_verifier(policy.verifier())
        .with_cert_resolver(Arc::new(StoreResolver::new(store.clone())));
    config.alpn_protocols = alpn_protocols.to_vec();

    Ok(EntryPointTlsState {
        store,
        policy,
        server_config: Arc::new(config),
        generation,
    })
}
