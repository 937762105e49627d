//! SNI Gateway
//!
//! TLS front door for a reverse proxy: terminates TLS on a fixed set of
//! entry points, picks the server certificate by SNI, optionally enforces
//! client certificates, and swaps all of it at runtime without touching the
//! listening sockets.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                 SNI GATEWAY                  │
//!                      │                                              │
//!   Client ────────────┼─▶ net::listener ──▶ rustls handshake ──────┐ │
//!                      │        │                 ▲                 │ │
//!                      │        │ current()       │ resolver /      │ │
//!                      │        ▼                 │ verifier        ▼ │
//!                      │   tls::manager ──────────┘        net::forward ──▶ Upstream
//!                      │        ▲                                     │
//!                      │        │ reconfigure()                       │
//!                      │   tls::reconciler ◀── config::watcher ◀── provider file
//!                      │        ▲                                     │
//!                      │        └── admin API (read-only)             │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use sni_gateway::config::loader::load_config;
use sni_gateway::lifecycle::signals::wait_for_shutdown_signal;
use sni_gateway::observability::{logging, metrics};
use sni_gateway::Gateway;

#[derive(Parser)]
#[command(name = "sni-gateway", version, about = "SNI-routing TLS front door")]
struct Args {
    /// Path to the gateway configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        entry_points = config.entry_points.len(),
        provider = config.provider.file.as_deref().unwrap_or("-"),
        "sni-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    wait_for_shutdown_signal(&gateway).await?;

    // A second signal during drain skips the wait.
    tokio::select! {
        drained = gateway.shutdown() => {
            if drained {
                tracing::info!("Shutdown complete");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Second interrupt, exiting without drain");
        }
    }

    Ok(())
}
