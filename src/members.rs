//! Member directory for workspaces the dashboard has opened.
//!
//! Member lists are cached per workspace as `Arc<Vec<Member>>` and replaced on
//! every load. Status changes never patch a cached row: a successful
//! invitation verdict invalidates the list and the next load brings the
//! server's view back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::DeckBackend;
use crate::error::DeckError;
use crate::owner::resolve_owner;
use crate::snapshot::AggregationSnapshot;
use crate::types::{Member, MemberRole, MemberStatus, WorkspaceId};

/// Avatars shown on a workspace card before the `+N` overflow badge.
pub const AVATAR_STRIP_LEN: usize = 3;

pub const AWAITING_APPROVAL: &str = "Awaiting Admin/Owner Approval";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarStrip {
    pub avatars: Vec<String>,
    pub overflow: usize,
}

/// What the caller sees in a member row's action column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum MemberAction {
    Actions { can_accept: bool, can_decline: bool },
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub email: String,
    pub display_name: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub action: MemberAction,
}

/// A stored list and the sequence number of the load that produced it.
struct StoredList {
    seq: u64,
    members: Arc<Vec<Member>>,
}

#[derive(Default)]
pub struct MemberDirectory {
    lists: RwLock<HashMap<WorkspaceId, StoredList>>,
    callers: RwLock<HashMap<WorkspaceId, Member>>,
    /// Handed out when a load starts; later loads carry larger numbers.
    next_seq: AtomicU64,
    /// Loads numbered at or below this started before the last `clear`.
    cleared_at: AtomicU64,
}

impl MemberDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin_load(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_cleared(&self, seq: u64) -> bool {
        seq <= self.cleared_at.load(Ordering::SeqCst)
    }

    /// Fetch the member list for `workspace_id` under its owning email.
    ///
    /// The result is stored only if `cancel` is still live once the fetch
    /// settles and no load that started later has stored its list first. In
    /// that case the newer list is returned.
    pub async fn load(
        &self,
        backend: &dyn DeckBackend,
        workspace_id: WorkspaceId,
        snapshot: &AggregationSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Member>>, DeckError> {
        let acting = resolve_owner(workspace_id, snapshot)?;
        let seq = self.begin_load();

        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Err(DeckError::Cancelled),
            result = backend.list_members(workspace_id, &acting) => result?,
        };
        if cancel.is_cancelled() || self.is_cleared(seq) {
            log::debug!("Members: dropping list for workspace {} (view closed)", workspace_id);
            return Err(DeckError::Cancelled);
        }

        let mut lists = self.lists.write();
        if let Some(stored) = lists.get(&workspace_id) {
            if stored.seq > seq {
                log::debug!(
                    "Members: dropping superseded list for workspace {} (load {} < {})",
                    workspace_id,
                    seq,
                    stored.seq
                );
                return Ok(stored.members.clone());
            }
        }
        let members = Arc::new(fetched);
        lists.insert(
            workspace_id,
            StoredList {
                seq,
                members: members.clone(),
            },
        );
        drop(lists);

        log::debug!(
            "Members: loaded {} member(s) for workspace {} as {}",
            members.len(),
            workspace_id,
            acting
        );
        Ok(members)
    }

    /// Fetch and remember the caller's own row (the role source for gates).
    pub async fn load_caller(
        &self,
        backend: &dyn DeckBackend,
        workspace_id: WorkspaceId,
        snapshot: &AggregationSnapshot,
        cancel: &CancellationToken,
    ) -> Result<MemberRole, DeckError> {
        let acting = resolve_owner(workspace_id, snapshot)?;
        let seq = self.begin_load();

        let me = tokio::select! {
            _ = cancel.cancelled() => return Err(DeckError::Cancelled),
            result = backend.current_user_info(workspace_id, &acting) => result?,
        };
        if cancel.is_cancelled() || self.is_cleared(seq) {
            log::debug!("Members: dropping caller row for workspace {} (session ended)", workspace_id);
            return Err(DeckError::Cancelled);
        }

        let role = me.role;
        self.callers.write().insert(workspace_id, me);
        Ok(role)
    }

    pub fn members(&self, workspace_id: WorkspaceId) -> Option<Arc<Vec<Member>>> {
        self.lists.read().get(&workspace_id).map(|s| s.members.clone())
    }

    pub fn status_of(&self, workspace_id: WorkspaceId, email: &str) -> Option<MemberStatus> {
        let lists = self.lists.read();
        lists
            .get(&workspace_id)?
            .members
            .iter()
            .find(|m| m.email.eq_ignore_ascii_case(email))
            .map(|m| m.status)
    }

    pub fn caller_role(&self, workspace_id: WorkspaceId) -> Option<MemberRole> {
        self.callers.read().get(&workspace_id).map(|m| m.role)
    }

    pub fn avatar_strip(&self, workspace_id: WorkspaceId) -> AvatarStrip {
        let Some(members) = self.members(workspace_id) else {
            return AvatarStrip {
                avatars: Vec::new(),
                overflow: 0,
            };
        };
        AvatarStrip {
            avatars: members
                .iter()
                .take(AVATAR_STRIP_LEN)
                .map(|m| m.profile_picture_url.clone())
                .collect(),
            overflow: members.len().saturating_sub(AVATAR_STRIP_LEN),
        }
    }

    pub fn member_views(&self, workspace_id: WorkspaceId, caller_role: MemberRole) -> Vec<MemberView> {
        let Some(members) = self.members(workspace_id) else {
            return Vec::new();
        };
        members
            .iter()
            .map(|m| MemberView {
                email: m.email.clone(),
                display_name: display_name(m),
                role: m.role,
                status: m.status,
                action: action_for(m.status, caller_role),
            })
            .collect()
    }

    /// Load every workspace's member list for the manage page.
    ///
    /// Failures are logged per workspace and skipped.
    pub async fn load_all(
        &self,
        backend: &dyn DeckBackend,
        snapshot: &AggregationSnapshot,
        cancel: &CancellationToken,
    ) -> HashMap<WorkspaceId, AvatarStrip> {
        let ids: Vec<WorkspaceId> = snapshot
            .iter()
            .flat_map(|(_, workspaces)| workspaces.iter().map(|w| w.id))
            .collect();

        let loads = ids.iter().map(|id| async move {
            (*id, self.load(backend, *id, snapshot, cancel).await)
        });

        let mut strips = HashMap::new();
        for (id, result) in join_all(loads).await {
            match result {
                Ok(_) => {
                    strips.insert(id, self.avatar_strip(id));
                }
                Err(e) if e.is_silent() => {}
                Err(e) => log::warn!("Members: workspace {} failed to load: {}", id, e),
            }
        }
        strips
    }

    /// Forget everything, including whatever loads are still in flight.
    pub fn clear(&self) {
        self.cleared_at
            .store(self.next_seq.load(Ordering::SeqCst), Ordering::SeqCst);
        self.lists.write().clear();
        self.callers.write().clear();
    }
}

fn display_name(member: &Member) -> String {
    let full = format!("{} {}", member.first_name.trim(), member.last_name.trim());
    let full = full.trim();
    if full.is_empty() {
        member.email.clone()
    } else {
        full.to_string()
    }
}

fn action_for(status: MemberStatus, caller_role: MemberRole) -> MemberAction {
    if caller_role.can_moderate() {
        let open = !status.is_terminal();
        return MemberAction::Actions {
            can_accept: open,
            can_decline: open,
        };
    }
    match status {
        MemberStatus::Joined => MemberAction::Placeholder(AWAITING_APPROVAL.to_string()),
        other => MemberAction::Placeholder(other.as_str().to_string()),
    }
}
