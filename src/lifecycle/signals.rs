//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - SIGTERM/SIGINT end the wait so the caller can shut down
//! - SIGHUP forces a TLS reload, re-reading every certificate file

use crate::lifecycle::startup::Gateway;

/// Block until a termination signal arrives, handling reload signals meanwhile.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal(gateway: &Gateway) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Received SIGINT");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM");
                return Ok(());
            }
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP, reloading TLS material");
                if let Err(e) = gateway.reload().await {
                    tracing::error!(error = %e, "Reload task failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal(_gateway: &Gateway) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl-C");
    Ok(())
}
