//! Registry of live connections.
//!
//! [`ConnectionRegistry`] is a single `RwLock<HashMap>`; every operation
//! holds the lock only for the map access itself, never across a socket
//! write. Lock scopes:
//!
//! - `register`, `deregister`, `close_all` take the write lock.
//! - `lookup`, `lookup_many`, `len` take the read lock.
//! - `close_all` signals the connections after releasing the lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use super::connection::SafeConnection;
use crate::domain::ConnectionId;
use crate::error::HubError;

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, Arc<SafeConnection>>,
    closed: bool,
}

/// Process-wide map of connection id → [`SafeConnection`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    drained: Notify,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] once [`Self::close_all`] has run.
    pub async fn register(&self, conn: Arc<SafeConnection>) -> Result<(), HubError> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(HubError::Stopped);
        }
        inner.connections.insert(conn.id(), conn);
        Ok(())
    }

    /// Removes a connection, returning it if it was registered.
    pub async fn deregister(&self, id: ConnectionId) -> Option<Arc<SafeConnection>> {
        let mut inner = self.inner.write().await;
        let removed = inner.connections.remove(&id);
        if inner.connections.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }

    /// Looks up one connection.
    pub async fn lookup(&self, id: ConnectionId) -> Option<Arc<SafeConnection>> {
        self.inner.read().await.connections.get(&id).cloned()
    }

    /// Looks up every id in `ids` under a single read lock, skipping
    /// connections that are gone.
    pub async fn lookup_many(&self, ids: &HashSet<ConnectionId>) -> Vec<Arc<SafeConnection>> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter_map(|id| inner.connections.get(id).cloned())
            .collect()
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.connections.is_empty()
    }

    /// Refuses further registrations and force-closes every connection.
    ///
    /// Connections observe the close in their command loop and deregister
    /// themselves during teardown.
    pub async fn close_all(&self) {
        let snapshot: Vec<Arc<SafeConnection>> = {
            let mut inner = self.inner.write().await;
            inner.closed = true;
            inner.connections.values().cloned().collect()
        };
        tracing::info!(connections = snapshot.len(), "closing all connections");
        for conn in snapshot {
            conn.close();
        }
    }

    /// Waits until every connection has deregistered.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.is_empty().await {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ws::test_support::channel_connection;

    #[tokio::test]
    async fn register_lookup_deregister() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = channel_connection();
        let id = conn.id();

        tokio_test::assert_ok!(registry.register(Arc::clone(&conn)).await);
        assert!(registry.lookup(id).await.is_some());
        assert_eq!(registry.len().await, 1);

        assert!(registry.deregister(id).await.is_some());
        assert!(registry.lookup(id).await.is_none());
        assert!(registry.deregister(id).await.is_none());
    }

    #[tokio::test]
    async fn lookup_many_skips_missing() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel_connection();
        tokio_test::assert_ok!(registry.register(Arc::clone(&a)).await);

        let ids: HashSet<ConnectionId> = [a.id(), ConnectionId::new()].into_iter().collect();
        let found = registry.lookup_many(&ids).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn close_all_signals_and_refuses_new() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = channel_connection();
        tokio_test::assert_ok!(registry.register(Arc::clone(&a)).await);

        registry.close_all().await;
        assert!(a.is_closed());

        let (late, _rl) = channel_connection();
        assert!(matches!(registry.register(late).await, Err(HubError::Stopped)));
    }

    #[tokio::test]
    async fn wait_drained_returns_after_last_deregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a, _ra) = channel_connection();
        let id = a.id();
        tokio_test::assert_ok!(registry.register(a).await);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.deregister(id).await;
        let done = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(done, Ok(Ok(()))));
    }
}
