//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! boot config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → entry points + static TLS snapshot
//!
//! Dynamic provider file:
//!     watcher.rs detects change
//!     → loader.rs reads a ConfigurationSnapshot
//!     → mpsc channel → tls::Reconciler
//! ```
//!
//! # Design Decisions
//! - Boot config is immutable once loaded; entry points never change at runtime
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::EntryPointConfig;
pub use schema::GatewayConfig;
