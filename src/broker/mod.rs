//! Broker layer: the pluggable message source/sink contract.
//!
//! A [`Broker`] is anything that can hand the hub its next inbound message
//! and accept outbound publishes. The hub never owns or closes brokers; it
//! receives an immutable [`BrokerMap`] at construction.

pub mod memory;
pub mod multiplexer;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Message;

pub use memory::MemoryBroker;
pub use multiplexer::spawn_receive_loops;

/// Name → broker handle, built once at composition time.
pub type BrokerMap = HashMap<String, Arc<dyn Broker>>;

/// Errors reported by a broker implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker was closed; no further messages will arrive.
    #[error("broker closed")]
    Closed,

    /// The broker refused an individual publish.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The broker failed permanently.
    #[error("broker failure: {0}")]
    Failed(String),
}

/// External message source and sink.
#[async_trait]
pub trait Broker: Debug + Send + Sync {
    /// Waits for the next inbound message.
    ///
    /// # Errors
    ///
    /// Any error is terminal: the hub stops reading from this broker and
    /// reports the failure on its error stream.
    async fn next(&self) -> Result<Message, BrokerError>;

    /// Accepts one outbound message.
    ///
    /// # Errors
    ///
    /// Returns a [`BrokerError`] if the broker cannot accept the message.
    async fn publish(&self, message: &Message) -> Result<(), BrokerError>;
}
