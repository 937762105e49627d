//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls::EntryPointTlsManager::current() (state pinned for the handshake)
//!     → rustls handshake (SNI certificate, optional client verification)
//!     → connection.rs (lifecycle tracking)
//!     → forward.rs (copy to upstream, or close)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - A failed handshake closes that connection only

pub mod connection;
pub mod forward;
pub mod listener;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::{EntryPointListener, HandshakeFailure, ListenerError};
