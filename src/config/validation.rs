//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (TLS entries reference existing entry points)
//! - Validate value ranges (limits > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NoEntryPoints,
    EmptyEntryPointName,
    DuplicateEntryPoint(String),
    InvalidAddress { field: String, value: String },
    ZeroLimit { entry_point: String, field: &'static str },
    UnknownEntryPoint { tls_index: usize, entry_point: String },
    StaticTlsWithProvider,
    EmptyAdminKey,
    UpstreamTlsWithoutUpstream(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NoEntryPoints => write!(f, "at least one entry point is required"),
            ValidationError::EmptyEntryPointName => write!(f, "entry point name must not be empty"),
            ValidationError::DuplicateEntryPoint(name) => {
                write!(f, "duplicate entry point '{}'", name)
            }
            ValidationError::InvalidAddress { field, value } => {
                write!(f, "{}: invalid address '{}'", field, value)
            }
            ValidationError::ZeroLimit { entry_point, field } => {
                write!(f, "entry point '{}': {} must be greater than 0", entry_point, field)
            }
            ValidationError::UnknownEntryPoint { tls_index, entry_point } => {
                write!(f, "tls[{}] references unknown entry point '{}'", tls_index, entry_point)
            }
            ValidationError::StaticTlsWithProvider => {
                write!(f, "static [[tls]] entries cannot be combined with provider.file")
            }
            ValidationError::EmptyAdminKey => {
                write!(f, "admin.api_key must be set when the admin API is enabled")
            }
            ValidationError::UpstreamTlsWithoutUpstream(name) => {
                write!(f, "entry point '{}': upstream_tls is set but upstream is not", name)
            }
        }
    }
}

/// Check a parsed configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.entry_points.is_empty() {
        errors.push(ValidationError::NoEntryPoints);
    }

    let mut names = HashSet::new();
    for ep in &config.entry_points {
        if ep.name.trim().is_empty() {
            errors.push(ValidationError::EmptyEntryPointName);
        } else if !names.insert(ep.name.as_str()) {
            errors.push(ValidationError::DuplicateEntryPoint(ep.name.clone()));
        }

        check_address(&mut errors, format!("entry_points.{}.address", ep.name), &ep.address);
        if let Some(upstream) = &ep.upstream {
            check_host_port(&mut errors, format!("entry_points.{}.upstream", ep.name), upstream);
        } else if ep.upstream_tls.is_some() {
            errors.push(ValidationError::UpstreamTlsWithoutUpstream(ep.name.clone()));
        }

        if ep.max_connections == 0 {
            errors.push(ValidationError::ZeroLimit {
                entry_point: ep.name.clone(),
                field: "max_connections",
            });
        }
        if ep.handshake_timeout_secs == 0 {
            errors.push(ValidationError::ZeroLimit {
                entry_point: ep.name.clone(),
                field: "handshake_timeout_secs",
            });
        }
    }

    for (tls_index, entry) in config.tls.iter().enumerate() {
        for name in &entry.entry_points {
            if !names.contains(name.as_str()) {
                errors.push(ValidationError::UnknownEntryPoint {
                    tls_index,
                    entry_point: name.clone(),
                });
            }
        }
    }

    if !config.tls.is_empty() && config.provider.file.is_some() {
        errors.push(ValidationError::StaticTlsWithProvider);
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::EmptyAdminKey);
        }
        check_address(&mut errors, "admin.bind_address".to_string(), &config.admin.bind_address);
    }

    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address".to_string(),
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: String, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

/// Accept `host:port` where host may be a name resolved at connect time.
fn check_host_port(errors: &mut Vec<ValidationError>, field: String, value: &str) {
    if value.parse::<SocketAddr>().is_ok() {
        return;
    }
    let valid = match value.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(|c: char| c.is_whitespace() || c == ':' || c == '/')
                && port.parse::<u16>().is_ok_and(|p| p != 0)
        }
        None => false,
    };
    if !valid {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
