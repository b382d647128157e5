//! Linked email registry.
//!
//! The session provider owns the set of linked identities; this module only
//! reads it. The set may change between reads, so dependents recompute from
//! the full list every time instead of patching.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::{ENV_ACCESS_TOKEN, ENV_LINKED_EMAILS};
use crate::types::LinkedEmail;

/// What the external session provider hands over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub linked_emails: Vec<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when signed out.
    async fn session(&self) -> Option<Session>;
}

/// Fixed session, set from the environment by the binary and by tests.
#[derive(Default)]
pub struct StaticIdentity {
    session: RwLock<Option<Session>>,
}

impl StaticIdentity {
    pub fn new(session: Option<Session>) -> Self {
        Self {
            session: RwLock::new(session),
        }
    }

    pub fn set(&self, session: Session) {
        *self.session.write() = Some(session);
    }

    pub fn clear(&self) {
        *self.session.write() = None;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }
}

pub struct LinkedEmailRegistry {
    provider: Arc<dyn IdentityProvider>,
}

impl LinkedEmailRegistry {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    /// Linked emails in provider order, deduplicated, blanks dropped.
    /// Empty when there is no session.
    pub async fn get(&self) -> Vec<LinkedEmail> {
        match self.provider.session().await {
            Some(session) => normalize_emails(&session.linked_emails),
            None => Vec::new(),
        }
    }

    pub async fn has_session(&self) -> bool {
        self.provider.session().await.is_some()
    }
}

pub fn normalize_emails(raw: &[String]) -> Vec<LinkedEmail> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|e| LinkedEmail::parse(e))
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

/// Session from `WORKDECK_ACCESS_TOKEN` and comma-separated `WORKDECK_LINKED_EMAILS`.
pub fn session_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Session> {
    let access_token = lookup(ENV_ACCESS_TOKEN).filter(|t| !t.trim().is_empty())?;
    let linked_emails = lookup(ENV_LINKED_EMAILS)
        .map(|raw| raw.split(',').map(|e| e.trim().to_string()).collect())
        .unwrap_or_default();
    Some(Session {
        access_token: access_token.trim().to_string(),
        linked_emails,
    })
}
