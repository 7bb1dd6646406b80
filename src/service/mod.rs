//! Service layer: fan-out delivery and the publish gateway.
//!
//! [`WorkerPool`] drains broker messages to subscribed connections;
//! [`PublishGateway`] is the one path through which anything is published
//! to a broker.

pub mod gateway;
pub mod worker_pool;

pub use gateway::PublishGateway;
pub use worker_pool::{FanOutReport, WorkerPool, fan_out};
