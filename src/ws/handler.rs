//! Axum WebSocket upgrade handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{OriginalUri, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use crate::access::RequestContext;
use crate::app_state::AppState;
use crate::error::HubError;

/// `GET {ws_path}` — Upgrade HTTP connection to WebSocket.
///
/// The access check runs before the upgrade, so a refused client gets a
/// plain HTTP error response and never holds a socket.
///
/// # Errors
///
/// Returns [`HubError::AccessDenied`] (403) if the validator refused the
/// request, or [`HubError::Stopped`] (503) while the hub shuts down.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HubError> {
    let ctx = RequestContext {
        path: uri.path().to_string(),
        query,
        headers,
    };
    let grant = state.hub.authorize(&ctx).await?;

    let hub = Arc::clone(&state.hub);
    Ok(ws.on_upgrade(move |socket| hub.run_connection(socket, grant)))
}
