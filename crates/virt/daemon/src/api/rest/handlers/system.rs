//! Health and status handlers

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
    })
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct DaemonStatusResponse {
    pub status: String,
    pub version: String,
    pub uptime: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub admitters: Vec<String>,
    pub feature_gates: Vec<String>,
    pub stored_instances: usize,
}

/// Daemon status endpoint
pub async fn daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    let config = state.dispatcher.config();

    Json(DaemonStatusResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        admitters: state.dispatcher.list_admitters().await,
        feature_gates: config.feature_gates.iter().cloned().collect(),
        stored_instances: state.lookup.vmi_count().await,
    })
}
