//! Configuration-driven access validator.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{AccessDenied, AccessGrant, AccessValidator, RequestContext};
use crate::config::AccessSettings;

/// Validator enforcing a shared token plus topic allow/deny lists.
///
/// - If a token is configured, the request must present it (bearer header
///   or `token` query parameter).
/// - The default scope is the allow list (or every topic when unset) minus
///   the deny list.
/// - Topics requested up front narrow the scope; a request whose topics are
///   all outside the scope is refused outright.
#[derive(Debug, Clone, Default)]
pub struct StaticValidator {
    token: Option<String>,
    allowed: Option<HashSet<String>>,
    denied: HashSet<String>,
}

impl StaticValidator {
    /// Builds a validator from access settings.
    #[must_use]
    pub fn new(settings: &AccessSettings) -> Self {
        Self {
            token: settings.token.clone(),
            allowed: settings
                .allow_topics
                .as_ref()
                .map(|topics| topics.iter().cloned().collect()),
            denied: settings.deny_topics.iter().cloned().collect(),
        }
    }

    fn default_grant(&self) -> AccessGrant {
        let grant = match &self.allowed {
            Some(allowed) => AccessGrant::topics(allowed.iter().cloned()),
            None => AccessGrant::all(),
        };
        grant.excluding(self.denied.iter().cloned())
    }
}

#[async_trait]
impl AccessValidator for StaticValidator {
    async fn authorize(
        &self,
        request: &RequestContext,
        topics: &[String],
    ) -> Result<AccessGrant, AccessDenied> {
        if let Some(expected) = &self.token
            && request.token() != Some(expected.as_str())
        {
            return Err(AccessDenied::new("missing or invalid token"));
        }

        let grant = self.default_grant();
        if topics.is_empty() {
            return Ok(grant);
        }

        let (admitted, denied) = grant.partition(topics);
        if admitted.is_empty() {
            return Err(AccessDenied::for_topics(
                "no requested topic is permitted",
                denied,
            ));
        }
        Ok(grant.restrict_to(&admitted))
    }
}
