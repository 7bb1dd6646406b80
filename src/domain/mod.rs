//! Domain layer: identifiers, messages, subscription store and lifecycle.
//!
//! This module contains the hub's core model: connection identity, the
//! broker message type, the concurrent topic subscription store used by
//! fan-out, and the shared hub lifecycle state.

pub mod connection_id;
pub mod hub_state;
pub mod message;
pub mod topic_store;

pub use connection_id::ConnectionId;
pub use hub_state::{HubState, ShutdownSignal, StateCell};
pub use message::Message;
pub use topic_store::TopicStore;
