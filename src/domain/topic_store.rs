//! Concurrent subscription store with per-topic fine-grained locking.
//!
//! [`TopicStore`] maps topic names to their subscriber sets. Each set is
//! individually protected by a [`tokio::sync::RwLock`], so fan-out lookups
//! on a topic run concurrently and joins/leaves on different topics never
//! block each other. A per-connection reverse index keeps teardown
//! proportional to the topics that connection actually joined.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::ConnectionId;

type SubscriberSet = Arc<RwLock<HashSet<ConnectionId>>>;
type Membership = Arc<Mutex<HashSet<String>>>;

/// Subscription bookkeeping: connection ↔ topic membership.
///
/// # Concurrency
///
/// - The outer topic map is read-locked for every per-topic operation and
///   write-locked only to create a topic entry or drop an empty one.
/// - A topic's subscriber set is locked while holding the outer read lock,
///   so an entry can never be dropped while a subscriber is being added.
/// - Joins and leaves of one connection are serialized by that
///   connection's own membership lock.
///
/// Topics exist implicitly: the first subscriber creates the entry and the
/// last one to leave removes it.
#[derive(Debug, Default)]
pub struct TopicStore {
    topics: RwLock<HashMap<String, SubscriberSet>>,
    memberships: RwLock<HashMap<ConnectionId, Membership>>,
}

impl TopicStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `connection` to every topic in `topics`.
    ///
    /// Joining an already-joined topic is a no-op.
    pub async fn subscribe(&self, connection: ConnectionId, topics: &[String]) {
        let membership = self.membership_or_insert(connection).await;
        let mut joined = membership.lock().await;
        for topic in topics {
            if joined.insert(topic.clone()) {
                self.add_subscriber(topic, connection).await;
            }
        }
    }

    /// Unsubscribes `connection` from every topic in `topics`.
    ///
    /// Leaving a topic that was never joined is a no-op.
    pub async fn unsubscribe(&self, connection: ConnectionId, topics: &[String]) {
        let Some(membership) = self.memberships.read().await.get(&connection).cloned() else {
            return;
        };
        let mut joined = membership.lock().await;
        for topic in topics {
            if joined.remove(topic) {
                self.remove_subscriber(topic, connection).await;
            }
        }
    }

    /// Removes `connection` from every topic it joined.
    ///
    /// Idempotent: a second call finds no membership and returns. Must not
    /// race with [`Self::subscribe`] for the same connection; the hub only
    /// calls it after the connection's command loop has exited.
    pub async fn unsubscribe_all(&self, connection: ConnectionId) {
        let Some(membership) = self.memberships.write().await.remove(&connection) else {
            return;
        };
        let joined = std::mem::take(&mut *membership.lock().await);
        for topic in &joined {
            self.remove_subscriber(topic, connection).await;
        }
        tracing::debug!(%connection, topics = joined.len(), "connection unsubscribed from all topics");
    }

    /// Returns the subscribers of `topic`. Unknown topics yield an empty set.
    pub async fn resolve(&self, topic: &str) -> HashSet<ConnectionId> {
        let map = self.topics.read().await;
        match map.get(topic) {
            Some(set) => set.read().await.clone(),
            None => HashSet::new(),
        }
    }

    /// Returns the deduplicated union of subscribers across `topics`.
    pub async fn resolve_many(&self, topics: &[String]) -> HashSet<ConnectionId> {
        let map = self.topics.read().await;
        let mut union = HashSet::new();
        for topic in topics {
            if let Some(set) = map.get(topic) {
                union.extend(set.read().await.iter().copied());
            }
        }
        union
    }

    /// Returns the topics `connection` is currently subscribed to, sorted.
    pub async fn topics_of(&self, connection: ConnectionId) -> Vec<String> {
        let Some(membership) = self.memberships.read().await.get(&connection).cloned() else {
            return Vec::new();
        };
        let mut topics: Vec<String> = membership.lock().await.iter().cloned().collect();
        topics.sort();
        topics
    }

    /// Returns the number of topics with at least one subscriber.
    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }

    async fn membership_or_insert(&self, connection: ConnectionId) -> Membership {
        if let Some(membership) = self.memberships.read().await.get(&connection) {
            return Arc::clone(membership);
        }
        let mut map = self.memberships.write().await;
        Arc::clone(map.entry(connection).or_default())
    }

    async fn add_subscriber(&self, topic: &str, connection: ConnectionId) {
        {
            let map = self.topics.read().await;
            if let Some(set) = map.get(topic) {
                set.write().await.insert(connection);
                return;
            }
        }
        let mut map = self.topics.write().await;
        let set = map.entry(topic.to_string()).or_default();
        set.write().await.insert(connection);
    }

    async fn remove_subscriber(&self, topic: &str, connection: ConnectionId) {
        let now_empty = {
            let map = self.topics.read().await;
            let Some(set) = map.get(topic) else {
                return;
            };
            let mut set = set.write().await;
            set.remove(&connection);
            set.is_empty()
        };
        if now_empty {
            // Re-check under the write lock: a subscriber may have joined in between.
            let mut map = self.topics.write().await;
            let still_empty = match map.get(topic) {
                Some(set) => set.read().await.is_empty(),
                None => false,
            };
            if still_empty {
                map.remove(topic);
            }
        }
    }
}
