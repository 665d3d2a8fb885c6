use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub subscriptions: usize,
    pub pending_operations: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let connections = state.sessions.session_count().await;
    match state.relay.stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                connections,
                subscriptions: stats.subscriptions,
                pending_operations: stats.pending_operations,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "relay_stopped",
                connections,
                subscriptions: 0,
                pending_operations: 0,
            }),
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::server::router;
    use crate::test_helpers::fake_relay;

    async fn get_health(state: Arc<AppState>) -> (StatusCode, Value) {
        let response = router(state, "/ws")
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn reports_relay_counters() {
        let (relay, _fake) = fake_relay();
        let handler: crate::relay::MessageHandler = Arc::new(|_: &str, _: zcmweb_core::Message| {});
        relay.subscribe("A", None, None, handler).await.unwrap();
        let state = AppState::new(relay, 8);

        let (status, body) = get_health(state).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["subscriptions"], 1);
        assert_eq!(body["pending_operations"], 0);
    }

    #[tokio::test]
    async fn stopped_relay_is_unavailable() {
        let (relay, _fake) = fake_relay();
        relay.stop().await.unwrap();
        let state = AppState::new(relay, 8);

        let (status, body) = get_health(state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "relay_stopped");
    }
}
