use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct KeepaliveState {
    /// Channels with a scoreboard when the bot started.
    pub channels: usize,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    channels: usize,
}

/// Router answering host uptime pings.
pub fn router(state: KeepaliveState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn index_handler() -> &'static str {
    "Scoreboard bot ON"
}

/// GET /health
async fn health_handler(State(state): State<Arc<KeepaliveState>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        channels: state.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn index_says_on() {
        assert_eq!(index_handler().await, "Scoreboard bot ON");
    }

    #[tokio::test]
    async fn health_reports_channel_count() {
        let state = Arc::new(KeepaliveState { channels: 3 });
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health, serde_json::json!({ "status": "ok", "channels": 3 }));
    }
}
