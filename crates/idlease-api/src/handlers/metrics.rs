use std::sync::{Mutex, OnceLock};

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the Prometheus metrics exporter
///
/// Installs the global recorder on first call and registers metric
/// descriptions. Later calls are no-ops.
///
/// # Errors
///
/// Returns an error if another global recorder was installed first.
pub fn init_exporter() -> Result<(), BuildError> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);

    idlease_core::metrics::init();
    Ok(())
}

/// Prometheus metrics endpoint
///
/// Returns metrics in Prometheus text exposition format.
///
/// GET /metrics
pub async fn metrics_handler() -> Response {
    match METRICS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Metrics exporter not initialized").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_handler() {
        init_exporter().unwrap();
        idlease_core::metrics::record_claim_attempt(idlease_core::metrics::ClaimOutcome::Claimed);

        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("idlease_claim_attempts_total"));
    }

    #[test]
    fn test_init_exporter_is_idempotent() {
        init_exporter().unwrap();
        init_exporter().unwrap();
    }
}
