//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::hub::Hub;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The hub serving WebSocket clients and owning the publish gateway.
    pub hub: Arc<Hub>,
}

impl AppState {
    /// Wraps a hub for use as router state.
    #[must_use]
    pub const fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }
}
