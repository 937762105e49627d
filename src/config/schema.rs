//! Configuration schema definitions.
//!
//! This module defines the complete boot-time configuration for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::tls::{FileOrContent, TlsEntry};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// TLS listening sockets. Fixed for the process lifetime.
    pub entry_points: Vec<EntryPointConfig>,

    /// Static TLS entries applied at boot (mutually exclusive with `provider`).
    pub tls: Vec<TlsEntry>,

    /// Dynamic TLS configuration source.
    pub provider: ProviderConfig,

    /// Admin / introspection API.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,
}

/// One TLS listening socket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EntryPointConfig {
    /// Unique entry point name referenced by TLS entries.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:443").
    pub address: String,

    /// `host:port` decrypted traffic is forwarded to.
    #[serde(default)]
    pub upstream: Option<String>,

    /// Re-encrypt forwarded traffic; absent means plain TCP to the upstream.
    #[serde(default)]
    pub upstream_tls: Option<UpstreamTlsConfig>,

    /// Maximum concurrent connections (backpressure).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum time a client may take to complete the TLS handshake.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// ALPN protocols offered, in preference order.
    #[serde(default = "default_alpn_protocols")]
    pub alpn_protocols: Vec<String>,
}

impl EntryPointConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            upstream: None,
            upstream_tls: None,
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            alpn_protocols: default_alpn_protocols(),
        }
    }
}

/// TLS towards an HTTPS (or any TLS) upstream.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamTlsConfig {
    /// Root CAs the upstream certificate must chain to, as paths or inline PEM.
    #[serde(default)]
    pub root_cas: Vec<FileOrContent>,

    /// Name to verify the upstream certificate against; defaults to the upstream host.
    #[serde(default)]
    pub server_name: Option<String>,
}

fn default_max_connections() -> usize {
    10_000
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_alpn_protocols() -> Vec<String> {
    vec!["h2".to_string(), "http/1.1".to_string()]
}

/// Dynamic provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// TOML file holding `entry_points` and `[[tls]]` entries.
    pub file: Option<String>,

    /// Re-read the file whenever it changes.
    pub watch: bool,

    /// Poll interval for filesystems without change notifications.
    pub poll_interval_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            file: None,
            watch: true,
            poll_interval_secs: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long active connections may drain after a shutdown signal.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 30,
        }
    }
}
