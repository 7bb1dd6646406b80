//! WebSocket message types: envelope, client commands, delivery frames.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Server → client envelope for command responses and errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
    /// Echo of the client-provided command ID, or a generated one.
    pub id: String,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: WsMessageType,
    /// ISO-8601 timestamp.
    pub timestamp: DateTime<Utc>,
    /// Variant-specific payload.
    pub payload: serde_json::Value,
}

/// Discriminator for server envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
    /// Successful command acknowledgement.
    Response,
    /// Command failure or protocol error.
    Error,
}

impl WsMessage {
    /// Builds a success envelope.
    #[must_use]
    pub fn response(id: Option<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            msg_type: WsMessageType::Response,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Builds an error envelope from a [`HubError`].
    ///
    /// The payload carries the same `code`/`message`/`details` body as the
    /// REST error responses, plus the failing `command` when known.
    #[must_use]
    pub fn error(id: Option<String>, command: Option<&str>, err: &HubError) -> Self {
        let mut payload = serde_json::to_value(err.to_body()).unwrap_or_default();
        if let (Some(command), Some(map)) = (command, payload.as_object_mut()) {
            map.insert("command".to_string(), command.into());
        }
        Self {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            msg_type: WsMessageType::Error,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// One client frame: an optional correlation ID plus the command.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    /// Correlation ID echoed in the reply.
    #[serde(default)]
    pub id: Option<String>,
    /// The command itself.
    #[serde(flatten)]
    pub command: WsCommand,
}

/// Commands that a client can send over WebSocket.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WsCommand {
    /// Subscribe to topics within the connection's access grant.
    Join {
        /// Topics to join.
        topics: Vec<String>,
    },
    /// Unsubscribe from topics.
    Leave {
        /// Topics to leave.
        topics: Vec<String>,
    },
    /// Publish a message through a named broker.
    Publish {
        /// Target broker key.
        broker: String,
        /// Target topics.
        topics: Vec<String>,
        /// Message payload; a JSON string is sent as its UTF-8 bytes.
        payload: serde_json::Value,
    },
}

impl WsCommand {
    /// Returns the command name as it appears on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Publish { .. } => "publish",
        }
    }
}

/// Decodes a client frame.
///
/// # Errors
///
/// Returns [`HubError::Protocol`] for malformed JSON, unknown commands,
/// missing fields, or empty topic names.
pub fn parse_frame(raw: &[u8]) -> Result<ClientFrame, HubError> {
    let frame: ClientFrame = serde_json::from_slice(raw)
        .map_err(|e| HubError::Protocol(format!("malformed command: {e}")))?;
    let topics = match &frame.command {
        WsCommand::Join { topics } | WsCommand::Leave { topics } => topics,
        WsCommand::Publish { topics, .. } => topics,
    };
    if topics.iter().any(String::is_empty) {
        return Err(HubError::Protocol("topic names must not be empty".to_string()));
    }
    Ok(frame)
}

/// Frame carrying a delivered payload: text when valid UTF-8, binary otherwise.
#[must_use]
pub fn payload_frame(payload: &[u8]) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::text(text),
        Err(_) => Message::binary(payload.to_vec()),
    }
}
