//! Access control: the validator contract and the grant it produces.
//!
//! The hub asks an [`AccessValidator`] once per connection, before the
//! WebSocket upgrade. The returned [`AccessGrant`] is the scope every later
//! `join` command is checked against; it never affects delivery to topics
//! that were already admitted.

pub mod static_validator;

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

pub use static_validator::StaticValidator;

/// Request attributes visible to the access validator.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request path of the upgrade request.
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Topics the client asked for up front via `?topics=a,b`.
    #[must_use]
    pub fn requested_topics(&self) -> Vec<String> {
        self.query
            .get("topics")
            .map(|raw| split_list(raw))
            .unwrap_or_default()
    }

    /// Bearer token from the `Authorization` header, or the `token` query
    /// parameter for clients that cannot set headers.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .or_else(|| self.query.get("token").map(String::as_str))
    }
}

/// Splits a comma-separated list, trimming blanks.
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Topic scope granted to one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessGrant {
    /// Explicitly granted topics. Ignored when `wildcard` is set.
    topics: HashSet<String>,
    /// Whether every topic not in `denied` is granted.
    wildcard: bool,
    /// Topics refused even under a wildcard grant.
    denied: HashSet<String>,
}

impl AccessGrant {
    /// Grants every topic.
    #[must_use]
    pub fn all() -> Self {
        Self {
            wildcard: true,
            ..Self::default()
        }
    }

    /// Grants exactly `topics`.
    #[must_use]
    pub fn topics<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Refuses `topics` in addition to whatever else this grant excludes.
    #[must_use]
    pub fn excluding<I, T>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.denied.extend(topics.into_iter().map(Into::into));
        self
    }

    /// Returns `true` if `topic` may be joined.
    #[must_use]
    pub fn permits(&self, topic: &str) -> bool {
        !self.denied.contains(topic) && (self.wildcard || self.topics.contains(topic))
    }

    /// Splits `requested` into `(admitted, denied)` preserving order.
    #[must_use]
    pub fn partition(&self, requested: &[String]) -> (Vec<String>, Vec<String>) {
        requested.iter().cloned().partition(|topic| self.permits(topic))
    }

    /// Narrows the grant to the intersection with `topics`.
    #[must_use]
    pub fn restrict_to(self, topics: &[String]) -> Self {
        let allowed = topics.iter().filter(|t| self.permits(t)).cloned();
        Self::topics(allowed)
    }
}

/// Refusal returned by an [`AccessValidator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("access denied: {reason}")]
pub struct AccessDenied {
    /// Human-readable reason.
    pub reason: String,
    /// Topics the refusal applies to; empty for a connection-level refusal.
    pub topics: Vec<String>,
}

impl AccessDenied {
    /// Connection-level refusal.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            topics: Vec::new(),
        }
    }

    /// Refusal naming specific topics.
    #[must_use]
    pub fn for_topics(reason: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            reason: reason.into(),
            topics,
        }
    }
}

/// External authority deciding which topics a connection may join.
#[async_trait]
pub trait AccessValidator: Debug + Send + Sync {
    /// Decides the scope for one connection.
    ///
    /// `topics` are the topics requested up front; an empty slice asks for
    /// the validator's default scope.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] if the connection must be refused.
    async fn authorize(
        &self,
        request: &RequestContext,
        topics: &[String],
    ) -> Result<AccessGrant, AccessDenied>;
}

/// Validator granting every topic to every connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessValidator for AllowAll {
    async fn authorize(
        &self,
        _request: &RequestContext,
        topics: &[String],
    ) -> Result<AccessGrant, AccessDenied> {
        if topics.is_empty() {
            Ok(AccessGrant::all())
        } else {
            Ok(AccessGrant::topics(topics.iter().cloned()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_grant_permits_nothing() {
        assert!(!AccessGrant::default().permits("orders"));
    }

    #[test]
    fn wildcard_respects_exclusions() {
        let grant = AccessGrant::all().excluding(["admin"]);
        assert!(grant.permits("orders"));
        assert!(!grant.permits("admin"));
    }

    #[test]
    fn partition_splits_in_order() {
        let grant = AccessGrant::topics(["a", "c"]);
        let (admitted, denied) = grant.partition(&names(&["a", "b", "c"]));
        assert_eq!(admitted, names(&["a", "c"]));
        assert_eq!(denied, names(&["b"]));
    }

    #[test]
    fn restrict_to_intersects() {
        let grant = AccessGrant::all()
            .excluding(["admin"])
            .restrict_to(&names(&["orders", "admin"]));
        assert!(grant.permits("orders"));
        assert!(!grant.permits("admin"));
        assert!(!grant.permits("shipping"));
    }

    #[test]
    fn requested_topics_are_split() {
        let mut ctx = RequestContext::default();
        ctx.query.insert("topics".to_string(), "a, b,,c".to_string());
        assert_eq!(ctx.requested_topics(), names(&["a", "b", "c"]));
    }

    #[test]
    fn token_prefers_header() {
        let mut ctx = RequestContext::default();
        ctx.query.insert("token".to_string(), "from-query".to_string());
        assert_eq!(ctx.token(), Some("from-query"));

        ctx.headers
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(ctx.token(), Some("from-header"));
    }

    #[tokio::test]
    async fn allow_all_scopes_to_requested_topics() {
        let ctx = RequestContext::default();
        let Ok(grant) = AllowAll.authorize(&ctx, &names(&["a"])).await else {
            panic!("allow-all refused");
        };
        assert!(grant.permits("a"));
        assert!(!grant.permits("b"));
    }
}
