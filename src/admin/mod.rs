//! Read-only admin / introspection API.
//!
//! # Responsibilities
//! - Expose each entry point's current certificate store and client-auth mode
//! - Guard everything but the readiness probe behind a bearer token

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::net::ConnectionTracker;
use crate::tls::Reconciler;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub reconciler: Arc<Reconciler>,
    pub tracker: ConnectionTracker,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(reconciler: Arc<Reconciler>, tracker: ConnectionTracker, api_key: &str) -> Self {
        Self {
            reconciler,
            tracker,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let api = Router::new()
        .route("/api/status", get(get_status))
        .route("/api/entrypoints", get(list_entry_points))
        .route("/api/entrypoints/{name}", get(get_entry_point))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/ping", get(ping))
        .merge(api)
        .with_state(state)
}

/// Serve the admin API until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
