//! WebSocket layer: upgrade handling, per-connection command loop, and the
//! registry of live connections.
//!
//! Each upgraded socket is split in two. The write half is wrapped in a
//! [`SafeConnection`] shared with the fan-out workers; the read half drives
//! the connection's [`executor::Executor`].

pub mod connection;
pub mod executor;
pub mod handler;
pub mod messages;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::SafeConnection;
pub use registry::ConnectionRegistry;
