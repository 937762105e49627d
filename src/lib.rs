//! SNI Gateway Library

pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod tls;

pub use config::schema::GatewayConfig;
pub use lifecycle::{Gateway, Shutdown};
pub use tls::{EntryPointTlsManager, Reconciler};
