//! TLS termination core.
//!
//! # Data Flow
//! ```text
//! ConfigurationSnapshot (pushed by a provider)
//!     → reconciler.rs (scope, diff, serialize applications)
//!     → material.rs (PEM sources → Certificate / trust pool)
//!     → store.rs (SNI index + mandatory default)
//!     → client_auth.rs (trust pool + enforcement mode)
//!     → manager.rs (atomic swap of EntryPointTlsState)
//!
//! Handshake:
//!     net listener → manager.current() → rustls ServerConfig
//!     → StoreResolver::resolve (SNI) / ClientAuthPolicy verifier (mTLS)
//! ```
//!
//! # Design Decisions
//! - Store and Policy are immutable; every change builds new values
//! - Readers load one state pointer per handshake and never lock
//! - One failing entry point never blocks or resets another

pub mod client_auth;
pub mod error;
pub mod manager;
pub mod material;
pub mod reconciler;
pub mod snapshot;
pub mod store;

use std::sync::{Arc, OnceLock};

use rustls::crypto::CryptoProvider;

pub use client_auth::{ClientAuthMode, ClientAuthPolicy};
pub use error::{MaterialError, ReconcileError, ReconfigureError, VerificationError};
pub use manager::{EntryPointTlsManager, EntryPointTlsState};
pub use material::{Certificate, FileOrContent};
pub use reconciler::{ReconcileReport, Reconciler};
pub use snapshot::{ClientAuthConfig, ConfigurationSnapshot, TlsCertificateConfig, TlsEntry};
pub use store::CertificateStore;

/// Crypto provider shared by every key load, verifier, and server config.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    static PROVIDER: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    PROVIDER
        .get_or_init(|| Arc::new(rustls::crypto::ring::default_provider()))
        .clone()
}
