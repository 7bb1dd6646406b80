//! Per-connection command loop.
//!
//! The [`Executor`] reads one client frame at a time and applies it:
//! `join` against the connection's [`AccessGrant`], `leave` directly on the
//! [`TopicStore`], and `publish` through the [`PublishGateway`]. Every
//! command gets exactly one reply frame. A command in flight is abandoned
//! as soon as the connection is closed, so a slow broker cannot hold a
//! connection past hub shutdown.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};

use super::connection::SafeConnection;
use super::messages::{ClientFrame, WsCommand, WsMessage, parse_frame};
use crate::access::{AccessDenied, AccessGrant};
use crate::domain::{Message as BrokerMessage, ShutdownSignal, TopicStore};
use crate::error::HubError;
use crate::service::PublishGateway;

/// Lifecycle of one connection.
///
/// `Connected` and `AccessCheck` are traversed in the upgrade handler
/// before an executor exists; the executor itself starts at `Authorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Handshake in progress.
    Connected,
    /// Waiting for the access validator.
    AccessCheck,
    /// Access granted, command loop not yet started.
    Authorized,
    /// Command loop running.
    Serving,
    /// Command loop exited.
    Closed,
}

/// Command loop for one connection.
#[derive(Debug)]
pub struct Executor {
    conn: Arc<SafeConnection>,
    topics: Arc<TopicStore>,
    gateway: PublishGateway,
    grant: AccessGrant,
    shutdown: ShutdownSignal,
    phase: ConnectionPhase,
}

impl Executor {
    /// Creates an executor for an authorized connection.
    #[must_use]
    pub fn new(
        conn: Arc<SafeConnection>,
        topics: Arc<TopicStore>,
        gateway: PublishGateway,
        grant: AccessGrant,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            conn,
            topics,
            gateway,
            grant,
            shutdown,
            phase: ConnectionPhase::Authorized,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Runs the command loop until the client closes, the transport fails,
    /// or the connection is closed from the hub side.
    ///
    /// Malformed frames are answered with a protocol error and do not end
    /// the loop. The caller owns teardown.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Transport`] if reading from or replying to the
    /// client fails.
    pub async fn run<S>(&mut self, mut stream: S) -> Result<(), HubError>
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin,
    {
        self.phase = ConnectionPhase::Serving;
        let conn = Arc::clone(&self.conn);
        let result = loop {
            let frame = tokio::select! {
                biased;
                () = conn.wait_closed() => break Ok(()),
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    if let ControlFlow::Break(result) =
                        self.dispatch_until_closed(text.as_str().as_bytes()).await
                    {
                        break result;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let ControlFlow::Break(result) = self.dispatch_until_closed(&bytes).await {
                        break result;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(err)) => break Err(HubError::Transport(err.to_string())),
            }
        };
        self.phase = ConnectionPhase::Closed;
        result
    }

    /// Runs [`Self::dispatch`] unless the connection closes first.
    async fn dispatch_until_closed(&self, raw: &[u8]) -> ControlFlow<Result<(), HubError>> {
        tokio::select! {
            biased;
            () = self.conn.wait_closed() => ControlFlow::Break(Ok(())),
            result = self.dispatch(raw) => match result {
                Ok(()) => ControlFlow::Continue(()),
                Err(err) => ControlFlow::Break(Err(err)),
            },
        }
    }

    /// Decodes and executes one frame, queueing the reply.
    async fn dispatch(&self, raw: &[u8]) -> Result<(), HubError> {
        let ClientFrame { id, command } = match parse_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(connection = %self.conn.id(), error = %err, "rejected client frame");
                return self.conn.write_json(&WsMessage::error(None, None, &err));
            }
        };

        let name = command.name();
        let reply = match self.execute(command).await {
            Ok(payload) => WsMessage::response(id, payload),
            Err(err) => {
                tracing::debug!(connection = %self.conn.id(), command = name, error = %err, "command failed");
                WsMessage::error(id, Some(name), &err)
            }
        };
        self.conn.write_json(&reply)
    }

    async fn execute(&self, command: WsCommand) -> Result<serde_json::Value, HubError> {
        let connection = self.conn.id();
        match command {
            WsCommand::Join { topics } => {
                let (admitted, denied) = self.grant.partition(&topics);
                if !admitted.is_empty() {
                    self.topics.subscribe(connection, &admitted).await;
                }
                if !denied.is_empty() {
                    tracing::warn!(%connection, ?denied, "join denied for topics");
                    return Err(AccessDenied::for_topics("topic not permitted", denied).into());
                }
                tracing::debug!(%connection, ?admitted, "joined topics");
                Ok(serde_json::json!({ "command": "join", "topics": admitted }))
            }
            WsCommand::Leave { topics } => {
                self.topics.unsubscribe(connection, &topics).await;
                tracing::debug!(%connection, ?topics, "left topics");
                Ok(serde_json::json!({ "command": "leave", "topics": topics }))
            }
            WsCommand::Publish {
                broker,
                topics,
                payload,
            } => {
                if !self.shutdown.is_running() {
                    return Err(HubError::Stopped);
                }
                let message =
                    BrokerMessage::new(broker, topics, BrokerMessage::payload_from_json(&payload));
                self.gateway.publish(std::slice::from_ref(&message)).await?;
                Ok(serde_json::json!({
                    "command": "publish",
                    "broker": message.broker,
                    "topics": message.topics,
                }))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinHandle;

    use super::*;
    use crate::broker::{Broker, BrokerMap, MemoryBroker};
    use crate::domain::StateCell;
    use crate::ws::test_support::{
        Inbox, Outbox, channel_connection, client_stream, field, next_json,
    };

    struct Fixture {
        conn: Arc<SafeConnection>,
        store: Arc<TopicStore>,
        broker: Arc<MemoryBroker>,
        state: StateCell,
        inbox: Inbox,
        outbox: Outbox,
        task: JoinHandle<(Result<(), HubError>, ConnectionPhase)>,
    }

    fn start() -> Fixture {
        let broker = Arc::new(MemoryBroker::new(8));
        let mut brokers = BrokerMap::new();
        brokers.insert("events".to_string(), Arc::clone(&broker) as Arc<dyn Broker>);
        let gateway = PublishGateway::new(Arc::new(brokers));

        let store = Arc::new(TopicStore::new());
        let (conn, outbox) = channel_connection();
        let (inbox, stream) = client_stream();
        let grant = AccessGrant::all().excluding(["admin"]);
        let state = StateCell::new();
        let mut executor = Executor::new(
            Arc::clone(&conn),
            Arc::clone(&store),
            gateway,
            grant,
            state.signal(),
        );
        assert_eq!(executor.phase(), ConnectionPhase::Authorized);

        let task = tokio::spawn(async move {
            let result = executor.run(stream).await;
            (result, executor.phase())
        });
        Fixture {
            conn,
            store,
            broker,
            state,
            inbox,
            outbox,
            task,
        }
    }

    fn send(inbox: &Inbox, text: &str) {
        if inbox.send(Ok(Message::text(text.to_string()))).is_err() {
            panic!("executor stopped reading");
        }
    }

    async fn reply(outbox: &mut Outbox) -> serde_json::Value {
        let Some(value) = next_json(outbox).await else {
            panic!("expected a reply frame");
        };
        value
    }

    #[tokio::test]
    async fn join_subscribes_and_acknowledges() {
        let mut fx = start();
        send(&fx.inbox, r#"{"id":"1","command":"join","topics":["orders"]}"#);

        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "response");
        assert_eq!(field(&value, "/id"), "1");
        assert_eq!(field(&value, "/payload/topics"), serde_json::json!(["orders"]));
        assert!(fx.store.resolve("orders").await.contains(&fx.conn.id()));
    }

    #[tokio::test]
    async fn denied_topic_is_rejected_and_connection_stays_open() {
        let mut fx = start();
        send(&fx.inbox, r#"{"command":"join","topics":["admin","orders"]}"#);

        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "error");
        assert_eq!(field(&value, "/payload/code"), 4003);
        assert_eq!(field(&value, "/payload/details/topics"), serde_json::json!(["admin"]));
        assert!(fx.store.resolve("admin").await.is_empty());
        assert!(fx.store.resolve("orders").await.contains(&fx.conn.id()));

        send(&fx.inbox, r#"{"command":"leave","topics":["orders"]}"#);
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "response");
        assert!(!fx.task.is_finished());
    }

    #[tokio::test]
    async fn malformed_frame_gets_protocol_error_and_loop_continues() {
        let mut fx = start();
        send(&fx.inbox, "{broken");
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/payload/code"), 1001);

        send(&fx.inbox, r#"{"command":"shout","topics":["x"]}"#);
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "error");

        send(&fx.inbox, r#"{"command":"leave","topics":["never-joined"]}"#);
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "response");
    }

    #[tokio::test]
    async fn publish_goes_through_gateway() {
        let mut fx = start();
        send(
            &fx.inbox,
            r#"{"command":"publish","broker":"events","topics":["orders"],"payload":"X"}"#,
        );
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "response");

        let published = tokio::time::timeout(Duration::from_secs(1), fx.broker.next()).await;
        let Ok(Ok(message)) = published else {
            panic!("broker did not receive the publish");
        };
        assert_eq!(message.topics, vec!["orders".to_string()]);
        assert_eq!(message.payload, b"X".to_vec());
    }

    #[tokio::test]
    async fn publish_to_unknown_broker_is_an_error_frame() {
        let mut fx = start();
        send(
            &fx.inbox,
            r#"{"command":"publish","broker":"nope","topics":["t"],"payload":"X"}"#,
        );
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "error");
        assert_eq!(field(&value, "/payload/code"), 2001);
        assert_eq!(field(&value, "/payload/command"), "publish");
    }

    #[tokio::test]
    async fn publish_is_refused_once_hub_is_stopping() {
        let mut fx = start();
        assert!(fx.state.begin_stop());
        send(
            &fx.inbox,
            r#"{"command":"publish","broker":"events","topics":["orders"],"payload":"X"}"#,
        );
        let value = reply(&mut fx.outbox).await;
        assert_eq!(field(&value, "/type"), "error");
        assert_eq!(field(&value, "/payload/code"), 3005);

        let published = tokio::time::timeout(Duration::from_millis(100), fx.broker.next()).await;
        assert!(published.is_err());
    }

    #[tokio::test]
    async fn client_close_ends_loop_cleanly() {
        let fx = start();
        send(&fx.inbox, r#"{"command":"join","topics":["a"]}"#);
        if fx.inbox.send(Ok(Message::Close(None))).is_err() {
            panic!("executor stopped reading");
        }
        let done = tokio::time::timeout(Duration::from_secs(1), fx.task).await;
        let Ok(Ok((result, phase))) = done else {
            panic!("executor did not finish");
        };
        assert!(result.is_ok());
        assert_eq!(phase, ConnectionPhase::Closed);
    }

    #[tokio::test]
    async fn transport_error_ends_loop_with_error() {
        let fx = start();
        if fx.inbox.send(Err(axum::Error::new("reset by peer"))).is_err() {
            panic!("executor stopped reading");
        }
        let done = tokio::time::timeout(Duration::from_secs(1), fx.task).await;
        assert!(matches!(done, Ok(Ok((Err(HubError::Transport(_)), _)))));
    }

    #[tokio::test]
    async fn hub_side_close_ends_loop() {
        let fx = start();
        fx.conn.close();
        let done = tokio::time::timeout(Duration::from_secs(1), fx.task).await;
        assert!(matches!(done, Ok(Ok((Ok(()), ConnectionPhase::Closed)))));
    }
}
