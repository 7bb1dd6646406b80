//! Publish handlers: inject messages into brokers over HTTP.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{PublishRequest, PublishResponse};
use crate::app_state::AppState;
use crate::domain::HubState;
use crate::error::{ErrorResponse, HubError};

/// `POST /publish` — Publish a batch and wait for every broker to accept it.
///
/// # Errors
///
/// Returns [`HubError`] on invalid messages, an unknown broker (nothing is
/// published), or the first broker failure.
#[utoipa::path(
    post,
    path = "/api/v1/publish",
    tag = "Publish",
    summary = "Publish messages synchronously",
    description = "Publishes every message through its named broker, in order. All broker keys are resolved first, so an unknown broker fails the request before anything is published.",
    request_body = PublishRequest,
    responses(
        (status = 200, description = "All messages published", body = PublishResponse),
        (status = 400, description = "Invalid message", body = ErrorResponse),
        (status = 404, description = "Unknown broker", body = ErrorResponse),
        (status = 502, description = "Broker refused a publish", body = ErrorResponse),
        (status = 503, description = "Hub is stopping", body = ErrorResponse),
    )
)]
pub async fn publish(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<impl IntoResponse, HubError> {
    ensure_running(&state)?;
    let batch = req.into_batch()?;
    state.hub.gateway().publish(&batch).await?;
    Ok(Json(PublishResponse {
        accepted: batch.len(),
    }))
}

/// `POST /publish-async` — Publish a batch in the background.
///
/// # Errors
///
/// Returns [`HubError`] on invalid messages. Broker failures are logged,
/// not reported.
#[utoipa::path(
    post,
    path = "/api/v1/publish-async",
    tag = "Publish",
    summary = "Publish messages asynchronously",
    description = "Validates the batch and hands it to a background task. The response does not wait for the brokers.",
    request_body = PublishRequest,
    responses(
        (status = 202, description = "Batch accepted", body = PublishResponse),
        (status = 400, description = "Invalid message", body = ErrorResponse),
        (status = 503, description = "Hub is stopping", body = ErrorResponse),
    )
)]
pub async fn publish_async(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<impl IntoResponse, HubError> {
    ensure_running(&state)?;
    let batch = req.into_batch()?;
    let accepted = batch.len();
    state.hub.gateway().publish_async(batch);
    Ok((StatusCode::ACCEPTED, Json(PublishResponse { accepted })))
}

fn ensure_running(state: &AppState) -> Result<(), HubError> {
    if state.hub.state() == HubState::Running {
        Ok(())
    } else {
        Err(HubError::Stopped)
    }
}

/// Publish routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/publish", post(publish))
        .route("/publish-async", post(publish_async))
}
