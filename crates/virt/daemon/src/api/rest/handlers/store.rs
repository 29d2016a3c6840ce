//! In-memory store handlers
//!
//! The daemon has no backing cluster. These endpoints seed the objects that
//! admitters look up and expose the evacuation patches they issued.

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use virt_admission::EvacuationPatch;
use virt_types::{VirtualMachineInstance, VirtualMachineInstanceMigration};

/// Launcher pod to instance binding
#[derive(Debug, Deserialize)]
pub struct PodBinding {
    pub namespace: String,
    pub pod: String,
    pub vmi: String,
}

fn require(value: &str, what: &str) -> ApiResult<()> {
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Store or replace an instance
pub async fn put_instance(
    State(state): State<AppState>,
    Json(vmi): Json<VirtualMachineInstance>,
) -> ApiResult<StatusCode> {
    require(&vmi.metadata.name, "metadata.name")?;
    tracing::debug!(namespace = %vmi.metadata.namespace, name = %vmi.metadata.name, "Stored instance");
    state.lookup.insert_vmi(vmi).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Store or replace a migration
pub async fn put_migration(
    State(state): State<AppState>,
    Json(migration): Json<VirtualMachineInstanceMigration>,
) -> ApiResult<StatusCode> {
    require(&migration.metadata.name, "metadata.name")?;
    state.lookup.insert_migration(migration).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Bind a launcher pod to its instance
pub async fn put_pod(
    State(state): State<AppState>,
    Json(binding): Json<PodBinding>,
) -> ApiResult<StatusCode> {
    require(&binding.pod, "pod")?;
    require(&binding.vmi, "vmi")?;
    state
        .lookup
        .insert_pod(&binding.namespace, &binding.pod, &binding.vmi)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

/// Evacuation patches issued so far
pub async fn list_evacuations(State(state): State<AppState>) -> Json<Vec<EvacuationPatch>> {
    Json(state.lookup.patches().await)
}
