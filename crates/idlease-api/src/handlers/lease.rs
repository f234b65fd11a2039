use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::handlers::AppState;

/// Lease details for operators and tooling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaseResponse {
    pub id: i64,
    /// Owner token, hex encoded
    pub owner: String,
    /// Unix seconds
    pub expires_at: i64,
    pub namespace: String,
}

/// The allocated identifier as plain text
///
/// GET /
pub async fn get_id(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], state.id.to_string())
}

/// The held lease as JSON
///
/// GET /v1/lease
pub async fn get_lease(State(state): State<AppState>) -> Json<LeaseResponse> {
    Json(LeaseResponse {
        id: state.id,
        owner: state.owner.to_hex(),
        expires_at: state.current_expires_at(),
        namespace: state.namespace.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_get_id_is_plain_text() {
        let (state, _tx) = test_support::state();

        let response = get_id(State(state)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"42");
    }

    #[tokio::test]
    async fn test_get_lease_tracks_renewals() {
        let (state, tx) = test_support::state();

        let Json(before) = get_lease(State(state.clone())).await;
        assert_eq!(
            before,
            LeaseResponse {
                id: 42,
                owner: "deadbeef".to_string(),
                expires_at: 1_700_000_600,
                namespace: "workers".to_string(),
            }
        );

        tx.send(1_700_000_840).unwrap();
        let Json(after) = get_lease(State(state)).await;
        assert_eq!(after.expires_at, 1_700_000_840);
    }
}
