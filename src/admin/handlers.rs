use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::AdminState;
use crate::tls::{Certificate, ClientAuthMode, EntryPointTlsManager};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub entry_points: usize,
    pub active_connections: u64,
    pub last_revision: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub hostnames: Vec<String>,
    /// Unix timestamp.
    pub not_after: i64,
    pub fallback: bool,
}

impl From<&Certificate> for CertificateInfo {
    fn from(cert: &Certificate) -> Self {
        Self {
            subject: cert.subject().to_string(),
            hostnames: cert.hostnames().to_vec(),
            not_after: cert.not_after(),
            fallback: cert.is_fallback(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntryPointStatus {
    pub name: String,
    pub generation: u64,
    pub default_certificate: CertificateInfo,
    pub certificates: Vec<CertificateInfo>,
    /// Every name the store answers for, sorted.
    pub hostnames: Vec<String>,
    pub client_auth: ClientAuthMode,
    pub trust_anchors: usize,
}

impl From<&EntryPointTlsManager> for EntryPointStatus {
    fn from(manager: &EntryPointTlsManager) -> Self {
        let state = manager.current();
        let store = state.store();
        Self {
            name: manager.name().to_string(),
            generation: state.generation(),
            default_certificate: CertificateInfo::from(store.default_certificate().as_ref()),
            certificates: store
                .certificates()
                .iter()
                .map(|c| CertificateInfo::from(c.as_ref()))
                .collect(),
            hostnames: store.hostnames().into_iter().map(str::to_string).collect(),
            client_auth: state.policy().mode(),
            trust_anchors: state.policy().trust_anchor_count(),
        }
    }
}

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        entry_points: state.reconciler.managers().count(),
        active_connections: state.tracker.active_count(),
        last_revision: state.reconciler.last_revision(),
    })
}

pub async fn list_entry_points(State(state): State<AdminState>) -> Json<Vec<EntryPointStatus>> {
    Json(
        state
            .reconciler
            .managers()
            .map(|m| EntryPointStatus::from(m.as_ref()))
            .collect(),
    )
}

pub async fn get_entry_point(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<EntryPointStatus>, StatusCode> {
    state
        .reconciler
        .manager(&name)
        .map(|m| Json(EntryPointStatus::from(m.as_ref())))
        .ok_or(StatusCode::NOT_FOUND)
}
