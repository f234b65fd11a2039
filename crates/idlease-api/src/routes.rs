use axum::{Router, routing::get};

use crate::handlers::{
    AppState, get_id, get_lease, health_detailed, health_live, health_ready, metrics_handler,
};

/// Create the router with all routes and attach state
pub fn create_router_with_state(state: AppState) -> Router {
    let metrics_enabled = state.metrics_enabled;

    let router = Router::new()
        .route("/", get(get_id))
        .route("/v1/lease", get(get_lease))
        .route("/healthz", get(health_detailed))
        .route("/healthz/live", get(health_live))
        .route("/healthz/ready", get(health_ready));

    let router = if metrics_enabled { router.route("/metrics", get(metrics_handler)) } else { router };

    router.with_state(state)
}
