//! # relay-hub
//!
//! WebSocket pub/sub hub relaying broker messages to subscribed connections.
//!
//! Clients connect over WebSocket, pass an access check, then `join` and
//! `leave` topics and `publish` messages through named brokers. Every
//! message a broker produces is delivered to each connection subscribed to
//! any of its topics, at most once per connection.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler + Executor (ws/)      REST Handlers (api/)
//!     │         │                                 │
//!     │         └──────── PublishGateway (service/) ──► Brokers (broker/)
//!     │                                                   │
//!     │                            receive loops ◄────────┘
//!     │                                  │
//!     │                        bounded queue → WorkerPool (service/)
//!     │                                  │
//!     ├── TopicStore (domain/) ◄─────────┤
//!     └── ConnectionRegistry (ws/) ◄─────┘
//! ```
//!
//! [`hub::Hub`] is the composition root owning all of the above.

pub mod access;
pub mod api;
pub mod app_state;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod hub;
pub mod service;
pub mod ws;
