use std::time::SystemTime;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use idlease_storage::SlotStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::handlers::AppState;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Detailed health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    /// Identifier held by this instance
    pub id: i64,
    /// Uptime in seconds
    pub uptime: u64,
    pub storage_backend: String,
    pub storage_healthy: bool,
    /// Seconds until the lease lapses if no further renewal succeeds
    pub lease_remaining: i64,
}

/// Liveness probe
///
/// Always returns 200 OK if the server is running.
///
/// GET /healthz/live
pub async fn health_live() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe
///
/// Returns 200 while the slot store answers health checks, 503 otherwise.
///
/// GET /healthz/ready
pub async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.storage.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, "Storage health check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Detailed health status
///
/// GET /healthz
pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let storage_healthy = state.storage.health_check().await.is_ok();
    let uptime = SystemTime::now().duration_since(state.start_time).unwrap_or_default().as_secs();
    let now = state.clock.now();

    let response = HealthResponse {
        status: if storage_healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
        version: env!("CARGO_PKG_VERSION").to_string(),
        id: state.id,
        uptime,
        storage_backend: state.storage.kind().to_string(),
        storage_healthy,
        lease_remaining: (state.current_expires_at() - now).max(0),
    };

    let code = if storage_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(response))
}
