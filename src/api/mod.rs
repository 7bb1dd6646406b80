//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Publish endpoints are mounted under `/api/v1`; `/health` and the
//! WebSocket upgrade path live at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document for the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "relay-hub",
        description = "WebSocket pub/sub hub relaying broker messages to subscribed connections."
    ),
    paths(
        handlers::publish::publish,
        handlers::publish::publish_async,
        handlers::system::health_handler,
    ),
    components(schemas(
        dto::MessageDto,
        dto::PublishRequest,
        dto::PublishResponse,
        handlers::system::HealthResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "Publish", description = "Inject messages into brokers"),
        (name = "System", description = "Service health"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

/// Builds the full application: REST routes, the WebSocket upgrade route at
/// the hub's configured path, and the HTTP middleware stack.
pub fn build_app(state: AppState) -> Router {
    let settings = state.hub.settings();
    let ws_path = settings.path.clone();
    let handshake_timeout = settings.handshake_timeout;

    Router::new()
        .merge(build_router())
        .route(&ws_path, get(ws_handler))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            handshake_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
