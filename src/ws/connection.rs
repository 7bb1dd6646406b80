//! Safe connection: serialized, non-blocking writes on one WebSocket.
//!
//! A [`SafeConnection`] owns only the write half of a socket, and it owns it
//! through a dedicated writer task fed by a bounded outbound queue. Every
//! outbound frame (fan-out deliveries and command responses alike) is handed
//! to that queue with `try_send`, so a peer that stops reading fills its own
//! queue and is closed instead of parking the caller. The read half lives in
//! the connection's command loop.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::domain::ConnectionId;
use crate::error::HubError;

/// Boxed write half of a WebSocket.
pub type WsSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Default number of frames a connection may have pending.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Upper bound on flushing pending frames and the close frame on teardown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection handle whose writes are serialized independently of reads.
pub struct SafeConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    closed: Arc<watch::Sender<bool>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SafeConnection {
    /// Wraps the write half of a socket with the default outbound capacity.
    ///
    /// Spawns the writer task, so it must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(id: ConnectionId, sink: WsSink) -> Self {
        Self::with_capacity(id, sink, OUTBOUND_CAPACITY)
    }

    /// Wraps the write half of a socket with room for `capacity` pending
    /// frames (at least one).
    #[must_use]
    pub fn with_capacity(id: ConnectionId, sink: WsSink, capacity: usize) -> Self {
        let (outbound, queue) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);
        let writer = tokio::spawn(run_writer(id, sink, queue, Arc::clone(&closed)));
        Self {
            id,
            outbound,
            closed,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Returns the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues one frame for the writer task. Never waits on the peer.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if the connection was closed, its
    /// writer failed, or its outbound queue is full.
    pub fn write(&self, frame: Message) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::Transport("connection closed".to_string()));
        }
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => HubError::Transport("outbound queue full".to_string()),
            TrySendError::Closed(_) => HubError::Transport("connection writer stopped".to_string()),
        })
    }

    /// Serializes `value` as JSON and queues it as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Internal`] if serialization fails, or the errors
    /// of [`Self::write`].
    pub fn write_json<T: Serialize>(&self, value: &T) -> Result<(), HubError> {
        let json = serde_json::to_string(value).map_err(|e| HubError::Internal(e.to_string()))?;
        self.write(Message::text(json))
    }

    /// Schedules the connection for teardown.
    ///
    /// Non-blocking: the command loop and the writer task observe the
    /// signal and exit, after which the owner releases the socket.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Returns `true` once the connection was closed or its writer failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Closes the connection and waits for the writer task to shut the
    /// write half down.
    ///
    /// Pending frames and a close frame are flushed on a best-effort basis,
    /// bounded by a timeout in case the peer stopped reading.
    pub async fn release(&self) {
        self.close();
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(FLUSH_TIMEOUT * 2, &mut writer).await.is_err() {
            tracing::warn!(connection = %self.id, "connection writer did not exit, aborting");
            writer.abort();
        }
    }
}

async fn run_writer(
    id: ConnectionId,
    mut sink: WsSink,
    mut queue: mpsc::Receiver<Message>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut signal = closed.subscribe();
    loop {
        let frame = tokio::select! {
            biased;
            () = wait_closed(&mut signal) => break,
            frame = queue.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };
        let sent = tokio::select! {
            biased;
            () = wait_closed(&mut signal) => break,
            sent = sink.send(frame) => sent,
        };
        if let Err(err) = sent {
            tracing::debug!(connection = %id, error = %err, "websocket write failed");
            closed.send_replace(true);
            return;
        }
    }

    queue.close();
    let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async {
        while let Ok(frame) = queue.try_recv() {
            if sink.send(frame).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
    if flushed.is_err() {
        tracing::warn!(connection = %id, "timed out flushing close frame");
    }
}

async fn wait_closed(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|closed| *closed).await;
}

impl fmt::Debug for SafeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
