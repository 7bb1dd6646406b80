//! Hub error types with HTTP status code mapping.
//!
//! [`HubError`] is the central error type for the hub. Each variant maps to
//! a numeric code, an HTTP status for the REST surface, and the `error`
//! frame sent to WebSocket clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::access::AccessDenied;
use crate::broker::BrokerError;
use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "unknown broker: redis",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see [`HubError`] code ranges).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details (e.g. denied topics).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
}

/// Hub-wide error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category          | HTTP Status                  |
/// |-----------|-------------------|------------------------------|
/// | 1000–1999 | Protocol / input  | 400 Bad Request              |
/// | 2000–2999 | Not Found         | 404 Not Found                |
/// | 3000–3999 | Server / upstream | 500 / 502 / 503              |
/// | 4000–4999 | Access            | 403 Forbidden                |
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The access validator refused the request.
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),

    /// A client frame could not be decoded or named an unknown command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request body validation failed on the REST surface.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Socket read or write failure on a single connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// A broker refused a publish or its receive path terminated.
    #[error("broker {broker} failed: {source}")]
    Broker {
        /// Name of the failing broker.
        broker: String,
        /// Underlying broker error.
        #[source]
        source: BrokerError,
    },

    /// Writing a fanned-out message to one subscriber failed.
    #[error("delivery to connection {connection} failed: {reason}")]
    Delivery {
        /// Connection the write was addressed to.
        connection: ConnectionId,
        /// Transport failure description.
        reason: String,
    },

    /// A message named a broker the hub does not know.
    #[error("unknown broker: {0}")]
    UnknownBroker(String),

    /// The hub is shutting down or already stopped.
    #[error("hub is not running")]
    Stopped,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Protocol(_) => 1001,
            Self::InvalidRequest(_) => 1002,
            Self::UnknownBroker(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Config(_) => 3001,
            Self::Transport(_) => 3002,
            Self::Delivery { .. } => 3003,
            Self::Broker { .. } => 3004,
            Self::Stopped => 3005,
            Self::AccessDenied(_) => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Protocol(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownBroker(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::Broker { .. } => StatusCode::BAD_GATEWAY,
            Self::Stopped => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Transport(_) | Self::Delivery { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns structured details for variants that carry them.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::AccessDenied(denied) if !denied.topics.is_empty() => {
                Some(serde_json::json!({ "topics": denied.topics }))
            }
            Self::UnknownBroker(broker) | Self::Broker { broker, .. } => {
                Some(serde_json::json!({ "broker": broker }))
            }
            _ => None,
        }
    }

    /// Builds the JSON error body shared by the REST and WebSocket surfaces.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.error_code(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_body(),
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_to_forbidden_with_topics() {
        let err = HubError::from(AccessDenied::for_topics(
            "topic not permitted",
            vec!["admin".to_string()],
        ));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), 4003);

        let body = err.to_body();
        let Some(details) = body.details else {
            panic!("expected details");
        };
        assert_eq!(details, serde_json::json!({ "topics": ["admin"] }));
    }

    #[test]
    fn unknown_broker_is_not_found() {
        let err = HubError::UnknownBroker("redis".to_string());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "unknown broker: redis");
    }

    #[test]
    fn broker_failure_is_bad_gateway() {
        let err = HubError::Broker {
            broker: "events".to_string(),
            source: BrokerError::Closed,
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("events"));
    }

    #[test]
    fn into_response_sets_status() {
        let response = HubError::Stopped.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
