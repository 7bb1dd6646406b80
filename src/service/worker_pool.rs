//! Fan-out worker pool.
//!
//! Workers drain the bounded queue fed by the broker receive loops. For each
//! message they resolve the deduplicated subscriber set across its topics and
//! hand the payload to every target's outbound queue. A slow socket only
//! fills its own queue and is then dropped; it never stalls the workers.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;

use crate::domain::{Message, TopicStore};
use crate::error::HubError;
use crate::ws::ConnectionRegistry;
use crate::ws::messages::payload_frame;

/// Outcome of fanning out one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Connections the payload was written to.
    pub delivered: usize,
    /// Connections whose write failed and that were scheduled for teardown.
    pub failed: usize,
}

/// Pool of fan-out workers sharing one bounded queue.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    sender: mpsc::Sender<Message>,
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
    stop: watch::Sender<bool>,
    workers: Mutex<JoinSet<()>>,
    topics: Arc<TopicStore>,
    connections: Arc<ConnectionRegistry>,
}

impl WorkerPool {
    /// Creates a pool of `size` workers over a queue of `capacity` messages.
    ///
    /// Workers are spawned by [`Self::start`]. Zero values are raised to one.
    #[must_use]
    pub fn new(
        size: usize,
        capacity: usize,
        topics: Arc<TopicStore>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (stop, _) = watch::channel(false);
        Self {
            size: size.max(1),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            stop,
            workers: Mutex::new(JoinSet::new()),
            topics,
            connections,
        }
    }

    /// Returns a handle for enqueuing messages.
    ///
    /// Sending blocks while the queue is full and fails once the pool stopped.
    #[must_use]
    pub fn queue_handle(&self) -> mpsc::Sender<Message> {
        self.sender.clone()
    }

    /// Enqueues one message, waiting for room.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] once the pool has stopped.
    pub async fn queue(&self, message: Message) -> Result<(), HubError> {
        if *self.stop.borrow() {
            return Err(HubError::Stopped);
        }
        self.sender.send(message).await.map_err(|_| HubError::Stopped)
    }

    /// Spawns the workers.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        for worker in 0..self.size {
            workers.spawn(run_worker(
                worker,
                Arc::clone(&self.receiver),
                self.stop.subscribe(),
                Arc::clone(&self.topics),
                Arc::clone(&self.connections),
            ));
        }
        tracing::info!(workers = self.size, "fan-out workers started");
    }

    /// Stops the pool.
    ///
    /// Workers finish the delivery in hand and exit; the queue is then
    /// closed so producers observe the shutdown. Queued messages are dropped.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let mut workers = self.workers.lock().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "fan-out worker panicked");
            }
        }
        self.receiver.lock().await.close();
        tracing::info!("fan-out workers stopped");
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
    mut stop: watch::Receiver<bool>,
    topics: Arc<TopicStore>,
    connections: Arc<ConnectionRegistry>,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = stopped(&mut stop) => None,
            message = async { receiver.lock().await.recv().await } => message,
        };
        let Some(message) = next else {
            break;
        };
        let report = fan_out(&message, &topics, &connections).await;
        tracing::trace!(worker, broker = %message.broker, ?report, "message fanned out");
    }
    tracing::debug!(worker, "fan-out worker exited");
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Delivers `message` to every connection subscribed to any of its topics,
/// at most once per connection.
///
/// Each delivery only enqueues the frame on the connection's own outbound
/// queue, so a peer that stopped reading never holds up the worker. A
/// refused delivery (full queue, dead writer) is logged and the connection
/// is closed; the remaining deliveries still go ahead.
pub async fn fan_out(
    message: &Message,
    topics: &TopicStore,
    connections: &ConnectionRegistry,
) -> FanOutReport {
    let targets = topics.resolve_many(&message.topics).await;
    if targets.is_empty() {
        return FanOutReport::default();
    }

    let frame = payload_frame(&message.payload);
    let mut report = FanOutReport::default();
    for conn in connections.lookup_many(&targets).await {
        if conn.is_closed() {
            continue;
        }
        match conn.write(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                let err = HubError::Delivery {
                    connection: conn.id(),
                    reason: err.to_string(),
                };
                tracing::warn!(error = %err, "closing connection after failed delivery");
                conn.close();
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message as Frame;

    use super::*;
    use crate::ws::test_support::{
        channel_connection, failing_connection, next_text, stalled_connection,
    };

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn zero_subscribers_is_noop() {
        let store = TopicStore::new();
        let registry = ConnectionRegistry::new();
        let report = fan_out(&Message::new("b", ["nobody"], "X"), &store, &registry).await;
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test]
    async fn multi_topic_message_is_delivered_once() {
        let store = TopicStore::new();
        let registry = ConnectionRegistry::new();
        let (conn, mut outbox) = channel_connection();
        tokio_test::assert_ok!(registry.register(Arc::clone(&conn)).await);
        store.subscribe(conn.id(), &topics(&["a", "b"])).await;

        let report = fan_out(&Message::new("x", ["a", "b"], "once"), &store, &registry).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(next_text(&mut outbox).await.as_deref(), Some("once"));
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_abort_others() {
        let store = TopicStore::new();
        let registry = ConnectionRegistry::new();
        let stalled = stalled_connection(1);
        let (healthy, mut outbox) = channel_connection();
        for conn in [&stalled, &healthy] {
            tokio_test::assert_ok!(registry.register(Arc::clone(conn)).await);
            store.subscribe(conn.id(), &topics(&["t"])).await;
        }

        let mut failed = 0;
        for n in 0..3 {
            let report = fan_out(&Message::new("x", ["t"], format!("{n}")), &store, &registry).await;
            failed += report.failed;
        }
        assert_eq!(failed, 1);
        assert!(stalled.is_closed());
        assert!(!healthy.is_closed());
        for n in 0..3 {
            assert_eq!(next_text(&mut outbox).await, Some(format!("{n}")));
        }
    }

    #[tokio::test]
    async fn broken_writer_is_skipped_after_it_fails() {
        let store = TopicStore::new();
        let registry = ConnectionRegistry::new();
        let broken = failing_connection();
        tokio_test::assert_ok!(registry.register(Arc::clone(&broken)).await);
        store.subscribe(broken.id(), &topics(&["t"])).await;

        fan_out(&Message::new("x", ["t"], "1"), &store, &registry).await;
        let closed = tokio::time::timeout(Duration::from_secs(1), broken.wait_closed()).await;
        assert!(closed.is_ok());
        let report = fan_out(&Message::new("x", ["t"], "2"), &store, &registry).await;
        assert_eq!(report, FanOutReport::default());
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_block_ingestion_or_other_topics() {
        let store = Arc::new(TopicStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let stalled = stalled_connection(1);
        let (healthy, mut healthy_out) = channel_connection();
        let (other, mut other_out) = channel_connection();
        for (conn, topic) in [(&stalled, "t"), (&healthy, "t"), (&other, "u")] {
            tokio_test::assert_ok!(registry.register(Arc::clone(conn)).await);
            store.subscribe(conn.id(), &topics(&[topic])).await;
        }

        let pool = WorkerPool::new(2, 2, Arc::clone(&store), Arc::clone(&registry));
        pool.start().await;
        for n in 0..4 {
            let queued = tokio::time::timeout(
                Duration::from_secs(1),
                pool.queue(Message::new("x", ["t"], format!("{n}"))),
            )
            .await;
            assert!(matches!(queued, Ok(Ok(()))));
        }
        let queued =
            tokio::time::timeout(Duration::from_secs(1), pool.queue(Message::new("x", ["u"], "U")))
                .await;
        assert!(matches!(queued, Ok(Ok(()))));

        let mut received = Vec::new();
        for _ in 0..4 {
            let Some(text) = next_text(&mut healthy_out).await else {
                panic!("healthy subscriber missed a delivery");
            };
            received.push(text);
        }
        received.sort();
        assert_eq!(received, vec!["0", "1", "2", "3"]);
        assert_eq!(next_text(&mut other_out).await.as_deref(), Some("U"));
        assert!(stalled.is_closed());

        let stopped = tokio::time::timeout(Duration::from_secs(2), pool.stop()).await;
        assert!(stopped.is_ok());
    }

    #[tokio::test]
    async fn binary_payload_is_sent_as_binary() {
        let store = TopicStore::new();
        let registry = ConnectionRegistry::new();
        let (conn, mut outbox) = channel_connection();
        tokio_test::assert_ok!(registry.register(Arc::clone(&conn)).await);
        store.subscribe(conn.id(), &topics(&["t"])).await;

        fan_out(&Message::new("x", ["t"], vec![0xff_u8, 0x00]), &store, &registry).await;
        assert!(matches!(outbox.recv().await, Some(Frame::Binary(_))));
    }

    #[tokio::test]
    async fn pool_drains_queue_and_stops() {
        let store = Arc::new(TopicStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut outbox) = channel_connection();
        tokio_test::assert_ok!(registry.register(Arc::clone(&conn)).await);
        store.subscribe(conn.id(), &topics(&["t"])).await;

        let pool = WorkerPool::new(1, 4, Arc::clone(&store), Arc::clone(&registry));
        pool.start().await;
        tokio_test::assert_ok!(pool.queue(Message::new("x", ["t"], "1")).await);
        tokio_test::assert_ok!(pool.queue(Message::new("x", ["t"], "2")).await);

        assert_eq!(next_text(&mut outbox).await.as_deref(), Some("1"));
        assert_eq!(next_text(&mut outbox).await.as_deref(), Some("2"));

        let stopped = tokio::time::timeout(Duration::from_secs(1), pool.stop()).await;
        assert!(stopped.is_ok());
        assert!(matches!(
            pool.queue(Message::new("x", ["t"], "3")).await,
            Err(HubError::Stopped)
        ));
        assert!(pool.queue_handle().send(Message::new("x", ["t"], "4")).await.is_err());
    }
}
