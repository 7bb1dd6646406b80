//! Publish gateway: the single broker-facing publish path.
//!
//! Used by the WebSocket `publish` command and by the REST publish
//! endpoints. One async mutex serializes every batch so partial batches
//! from different callers never interleave.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::broker::{Broker, BrokerMap};
use crate::domain::Message;
use crate::error::HubError;

/// Entry point for injecting messages into brokers.
#[derive(Debug, Clone)]
pub struct PublishGateway {
    brokers: Arc<BrokerMap>,
    lock: Arc<Mutex<()>>,
}

impl PublishGateway {
    /// Creates a gateway over the hub's broker map.
    #[must_use]
    pub fn new(brokers: Arc<BrokerMap>) -> Self {
        Self {
            brokers,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Publishes `batch` synchronously.
    ///
    /// Every broker key is resolved before anything is published, so an
    /// unknown broker fails the call with no partial delivery. Publishing
    /// then proceeds in order and stops at the first broker error.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownBroker`] if any message names a broker the
    /// hub does not know, or [`HubError::Broker`] for the first publish the
    /// broker refuses.
    pub async fn publish(&self, batch: &[Message]) -> Result<(), HubError> {
        let resolved = batch
            .iter()
            .map(|message| {
                self.brokers
                    .get(&message.broker)
                    .map(|broker| (Arc::clone(broker), message))
                    .ok_or_else(|| HubError::UnknownBroker(message.broker.clone()))
            })
            .collect::<Result<Vec<(Arc<dyn Broker>, &Message)>, HubError>>()?;

        let _guard = self.lock.lock().await;
        for (broker, message) in resolved {
            broker
                .publish(message)
                .await
                .map_err(|source| HubError::Broker {
                    broker: message.broker.clone(),
                    source,
                })?;
        }
        tracing::debug!(messages = batch.len(), "batch published");
        Ok(())
    }

    /// Publishes `batch` in the background. Errors are logged, not returned.
    pub fn publish_async(&self, batch: Vec<Message>) {
        let gateway = self.clone();
        tokio::spawn(async move {
            if let Err(err) = gateway.publish(&batch).await {
                tracing::error!(error = %err, "async publish failed");
            }
        });
    }
}
