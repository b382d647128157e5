//! Query cache orchestration.
//!
//! Each mutation maps to a fixed set of query keys through one table
//! (`invalidations`). Handlers never name keys themselves: on success they
//! hand the mutation to `QueryCacheOrchestrator::on_success`, which
//! invalidates the table's keys and broadcasts one event per key. On failure
//! they call nothing, so cached state stays at its pre-mutation value.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{LinkedEmail, ScheduleId, WorkspaceId};

/// Channel buffer size for invalidation events
const EVENT_CHANNEL_SIZE: usize = 64;

/// Logical identity of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "query", rename_all = "camelCase")]
pub enum QueryKey {
    WorkspaceList { email: LinkedEmail },
    MemberList { workspace_id: WorkspaceId },
    PersonalReminder { schedule_id: ScheduleId },
    BoardColumns { workspace_id: WorkspaceId },
}

/// Every mutation the dashboard can issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    DeleteWorkspace { email: LinkedEmail, workspace_id: WorkspaceId },
    AcceptInvitation { workspace_id: WorkspaceId },
    DeclineInvitation { workspace_id: WorkspaceId },
    InviteMember { workspace_id: WorkspaceId },
    AddReminder { schedule_id: ScheduleId },
    UpdateReminder { schedule_id: ScheduleId },
    RemoveReminder { schedule_id: ScheduleId },
    CardCreated { workspace_id: WorkspaceId },
    CardUpdated {
        workspace_id: WorkspaceId,
        position_or_filters_changed: bool,
    },
}

/// The invalidation table.
pub fn invalidations(mutation: &Mutation) -> Vec<QueryKey> {
    match mutation {
        Mutation::DeleteWorkspace { email, .. } => vec![QueryKey::WorkspaceList {
            email: email.clone(),
        }],
        Mutation::AcceptInvitation { workspace_id }
        | Mutation::DeclineInvitation { workspace_id }
        | Mutation::InviteMember { workspace_id } => vec![QueryKey::MemberList {
            workspace_id: *workspace_id,
        }],
        Mutation::AddReminder { schedule_id }
        | Mutation::UpdateReminder { schedule_id }
        | Mutation::RemoveReminder { schedule_id } => vec![QueryKey::PersonalReminder {
            schedule_id: *schedule_id,
        }],
        Mutation::CardCreated { workspace_id } => vec![QueryKey::BoardColumns {
            workspace_id: *workspace_id,
        }],
        Mutation::CardUpdated {
            workspace_id,
            position_or_filters_changed,
        } => {
            if *position_or_filters_changed {
                vec![QueryKey::BoardColumns {
                    workspace_id: *workspace_id,
                }]
            } else {
                Vec::new()
            }
        }
    }
}

/// The external cache's invalidation hook.
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, key: &QueryKey);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub status: QueryStatus,
    pub invalidated: bool,
    pub value: Option<serde_json::Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            invalidated: false,
            value: None,
            updated_at: None,
        }
    }
}

/// In-process cache with the same status model as the UI's query client.
#[derive(Default)]
pub struct MemoryQueryCache {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
}

impl MemoryQueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loading(&self, key: QueryKey) {
        self.entries.write().entry(key).or_default().status = QueryStatus::Loading;
    }

    pub fn set_success(&self, key: QueryKey, value: serde_json::Value) {
        let mut entries = self.entries.write();
        let entry = entries.entry(key).or_default();
        entry.status = QueryStatus::Success;
        entry.invalidated = false;
        entry.value = Some(value);
        entry.updated_at = Some(Utc::now());
    }

    pub fn set_error(&self, key: QueryKey) {
        self.entries.write().entry(key).or_default().status = QueryStatus::Error;
    }

    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    pub fn invalidated_keys(&self) -> Vec<QueryKey> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.invalidated)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl QueryCache for MemoryQueryCache {
    fn invalidate(&self, key: &QueryKey) {
        // Unknown keys get an idle, invalidated entry so the next subscriber refetches.
        self.entries
            .write()
            .entry(key.clone())
            .or_default()
            .invalidated = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Invalidated(QueryKey),
}

pub struct QueryCacheOrchestrator {
    cache: Arc<dyn QueryCache>,
    events: broadcast::Sender<CacheEvent>,
}

impl QueryCacheOrchestrator {
    pub fn new(cache: Arc<dyn QueryCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self { cache, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Invalidate everything `mutation` affects. Returns the keys touched.
    pub fn on_success(&self, mutation: &Mutation) -> Vec<QueryKey> {
        let keys = invalidations(mutation);
        if keys.is_empty() {
            log::debug!("Cache: {:?} invalidates nothing", mutation);
        }
        for key in &keys {
            log::debug!("Cache: invalidating {:?}", key);
            self.cache.invalidate(key);
            // No subscribers is fine: the cache entry itself is already stale.
            let _ = self.events.send(CacheEvent::Invalidated(key.clone()));
        }
        keys
    }
}
