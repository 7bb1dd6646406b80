//! In-process broker backed by a bounded [`tokio::sync::mpsc`] channel.
//!
//! Every published message is looped back to [`Broker::next`], which makes
//! the memory broker a drop-in source for single-node deployments and tests.

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::{Broker, BrokerError};
use crate::domain::Message;

/// Loop-back broker living entirely inside the process.
#[derive(Debug)]
pub struct MemoryBroker {
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    receiver: Mutex<mpsc::Receiver<Message>>,
}

impl MemoryBroker {
    /// Creates a broker buffering up to `capacity` undelivered messages.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(rx),
        }
    }

    /// Closes the broker. Buffered messages are still handed out by
    /// [`Broker::next`], after which it returns [`BrokerError::Closed`].
    pub async fn close(&self) {
        self.sender.lock().await.take();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn next(&self) -> Result<Message, BrokerError> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(BrokerError::Closed)
    }

    async fn publish(&self, message: &Message) -> Result<(), BrokerError> {
        let sender = self.sender.lock().await.clone().ok_or(BrokerError::Closed)?;
        sender
            .send(message.clone())
            .await
            .map_err(|_| BrokerError::Closed)
    }
}
