//! Publish endpoint DTOs.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::Message;
use crate::error::HubError;

/// One message in a publish request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessageDto {
    /// Key of the broker to publish through.
    pub broker: String,
    /// Target topics; at least one.
    pub topics: Vec<String>,
    /// Payload. A JSON string is published as its UTF-8 bytes, any other
    /// value in its serialized form.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl MessageDto {
    /// Validates the DTO and converts it into a broker message.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidRequest`] if the broker key is empty, no
    /// topic is given, or a topic name is empty.
    pub fn into_message(self) -> Result<Message, HubError> {
        if self.broker.is_empty() {
            return Err(HubError::InvalidRequest("broker must not be empty".to_string()));
        }
        if self.topics.is_empty() {
            return Err(HubError::InvalidRequest(
                "message must name at least one topic".to_string(),
            ));
        }
        if self.topics.iter().any(String::is_empty) {
            return Err(HubError::InvalidRequest("topic names must not be empty".to_string()));
        }
        let payload = Message::payload_from_json(&self.payload);
        Ok(Message::new(self.broker, self.topics, payload))
    }
}

/// Request body for `POST /api/v1/publish` and `POST /api/v1/publish-async`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PublishRequest {
    /// Messages to publish, in order.
    pub messages: Vec<MessageDto>,
}

impl PublishRequest {
    /// Validates every message and converts the batch.
    ///
    /// # Errors
    ///
    /// Returns the first [`HubError::InvalidRequest`] found.
    pub fn into_batch(self) -> Result<Vec<Message>, HubError> {
        self.messages.into_iter().map(MessageDto::into_message).collect()
    }
}

/// Response body for the publish endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublishResponse {
    /// Number of messages accepted.
    pub accepted: usize,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn dto(broker: &str, topics: &[&str]) -> MessageDto {
        MessageDto {
            broker: broker.to_string(),
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            payload: serde_json::json!({ "id": 7 }),
        }
    }

    #[test]
    fn converts_valid_batch() {
        let request = PublishRequest {
            messages: vec![dto("memory", &["orders"]), dto("memory", &["a", "b"])],
        };
        let Ok(batch) = request.into_batch() else {
            panic!("batch should be valid");
        };
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.first().map(|m| m.payload.clone()), Some(br#"{"id":7}"#.to_vec()));
    }

    #[test]
    fn rejects_missing_topics_and_broker() {
        for bad in [dto("memory", &[]), dto("", &["t"]), dto("memory", &["ok", ""])] {
            assert!(matches!(bad.into_message(), Err(HubError::InvalidRequest(_))));
        }
    }
}
