//! Broker message model.

/// A message travelling between brokers and connections.
///
/// Delivered to the union of connections subscribed to any of its topics;
/// each connection receives at most one copy regardless of how many of the
/// message's topics it joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Key of the broker this message belongs to.
    pub broker: String,
    /// Target topic names, in the order supplied by the producer.
    pub topics: Vec<String>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a message for `broker` addressed to `topics`.
    #[must_use]
    pub fn new<I, T>(broker: impl Into<String>, topics: I, payload: impl Into<Vec<u8>>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            broker: broker.into(),
            topics: topics.into_iter().map(Into::into).collect(),
            payload: payload.into(),
        }
    }

    /// Builds the payload bytes from a JSON value.
    ///
    /// A JSON string contributes its UTF-8 bytes verbatim; any other value is
    /// carried in its serialized form.
    #[must_use]
    pub fn payload_from_json(value: &serde_json::Value) -> Vec<u8> {
        match value {
            serde_json::Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}
