//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::domain::HubState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` while the hub runs, `unavailable` otherwise.
    pub status: String,
    /// Hub lifecycle state.
    #[schema(value_type = String, example = "running")]
    pub state: HubState,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Response time (RFC 3339).
    pub timestamp: String,
    /// Crate version.
    pub version: String,
}

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns hub state, connection and topic counts, version, and current timestamp. Responds 503 once shutdown began.",
    responses(
        (status = 200, description = "Hub is running", body = HealthResponse),
        (status = 503, description = "Hub is stopping or stopped", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let hub_state = state.hub.state();
    let (status, code) = if hub_state == HubState::Running {
        ("healthy", StatusCode::OK)
    } else {
        ("unavailable", StatusCode::SERVICE_UNAVAILABLE)
    };
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            state: hub_state,
            connections: state.hub.connections().len().await,
            topics: state.hub.topics().topic_count().await,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
