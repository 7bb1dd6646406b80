//! Channel-backed stand-ins for WebSocket halves used by unit tests.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Stream, stream};
use tokio::sync::mpsc;

use super::connection::SafeConnection;
use crate::domain::ConnectionId;

/// Frames written to a channel-backed connection.
pub type Outbox = mpsc::UnboundedReceiver<Message>;

/// Client side of a channel-backed read stream.
pub type Inbox = mpsc::UnboundedSender<Result<Message, axum::Error>>;

/// Connection whose writes land in the returned receiver.
pub fn channel_connection() -> (Arc<SafeConnection>, Outbox) {
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let sink = futures_util::sink::unfold(tx, |tx, frame: Message| async move {
        tx.send(frame).map_err(|_| axum::Error::new("receiver dropped"))?;
        Ok::<_, axum::Error>(tx)
    });
    let conn = SafeConnection::new(ConnectionId::new(), Box::pin(sink));
    (Arc::new(conn), rx)
}

/// Connection whose every write fails.
pub fn failing_connection() -> Arc<SafeConnection> {
    let sink = futures_util::sink::unfold((), |(), _frame: Message| async move {
        Err::<(), _>(axum::Error::new("broken pipe"))
    });
    Arc::new(SafeConnection::new(ConnectionId::new(), Box::pin(sink)))
}

/// Connection whose sink never completes a send, with room for `capacity`
/// pending frames.
pub fn stalled_connection(capacity: usize) -> Arc<SafeConnection> {
    let sink = futures_util::sink::unfold((), |(), _frame: Message| {
        futures_util::future::pending::<Result<(), axum::Error>>()
    });
    Arc::new(SafeConnection::with_capacity(
        ConnectionId::new(),
        Box::pin(sink),
        capacity,
    ))
}

/// Read stream fed by the returned sender; ends when the sender is dropped.
pub fn client_stream() -> (
    Inbox,
    std::pin::Pin<Box<dyn Stream<Item = Result<Message, axum::Error>> + Send>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, Box::pin(stream))
}

/// Returns the next text frame, skipping nothing.
pub async fn next_text(outbox: &mut Outbox) -> Option<String> {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(1), outbox.recv())
        .await
        .ok()
        .flatten()?;
    match frame {
        Message::Text(text) => Some(text.as_str().to_string()),
        _ => None,
    }
}

/// Returns the next text frame parsed as JSON.
pub async fn next_json(outbox: &mut Outbox) -> Option<serde_json::Value> {
    let text = next_text(outbox).await?;
    serde_json::from_str(&text).ok()
}

/// Returns the JSON value at `pointer`, or `null` when absent.
pub fn field(value: &serde_json::Value, pointer: &str) -> serde_json::Value {
    value.pointer(pointer).cloned().unwrap_or_default()
}
