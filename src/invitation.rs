//! Invitation state machine and the mutations that drive it.
//!
//! Status moves only along the `TRANSITIONS` table. Accept and decline are
//! gated on the caller's role before anything else happens; the server stays
//! authoritative, so a successful verdict invalidates the member list rather
//! than patching the cached row.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

use crate::api::DeckBackend;
use crate::cache::{Mutation, QueryCacheOrchestrator};
use crate::error::DeckError;
use crate::members::MemberDirectory;
use crate::owner::resolve_owner;
use crate::snapshot::AggregationSnapshot;
use crate::types::{MemberRole, MemberStatus, WorkspaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationAction {
    Accept,
    Decline,
}

impl InvitationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationAction::Accept => "accept",
            InvitationAction::Decline => "decline",
        }
    }
}

/// (from, action, to). Pairs not listed are rejected.
pub const TRANSITIONS: &[(MemberStatus, InvitationAction, MemberStatus)] = &[
    (MemberStatus::Pending, InvitationAction::Accept, MemberStatus::Approved),
    (MemberStatus::Joined, InvitationAction::Accept, MemberStatus::Approved),
    (MemberStatus::Pending, InvitationAction::Decline, MemberStatus::Declined),
    (MemberStatus::Joined, InvitationAction::Decline, MemberStatus::Declined),
];

pub fn transition(from: MemberStatus, action: InvitationAction) -> Result<MemberStatus, DeckError> {
    TRANSITIONS
        .iter()
        .find(|(f, a, _)| *f == from && *a == action)
        .map(|(_, _, to)| *to)
        .ok_or(DeckError::InvalidTransition {
            from,
            action: action.as_str(),
        })
}

pub fn authorize(role: MemberRole, action: InvitationAction) -> Result<(), DeckError> {
    if role.can_moderate() {
        Ok(())
    } else {
        Err(DeckError::Forbidden(format!(
            "a {} cannot {} invitations",
            role,
            action.as_str()
        )))
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap())
}

pub fn validate_invitee(raw: &str) -> Result<String, DeckError> {
    let trimmed = raw.trim();
    if email_re().is_match(trimmed) {
        Ok(trimmed.to_lowercase())
    } else {
        Err(DeckError::ValidationFailure(format!(
            "'{}' is not a valid email address",
            trimmed
        )))
    }
}

type EntityKey = (WorkspaceId, String);

/// Marks one (workspace, member) as busy until dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<EntityKey>>>,
    key: EntityKey,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<EntityKey>>>, key: EntityKey) -> Result<Self, DeckError> {
        if !set.lock().insert(key.clone()) {
            return Err(DeckError::MutationPending(key.1));
        }
        Ok(Self {
            set: set.clone(),
            key,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

pub struct InvitationService {
    backend: Arc<dyn DeckBackend>,
    directory: Arc<MemberDirectory>,
    orchestrator: Arc<QueryCacheOrchestrator>,
    in_flight: Arc<Mutex<HashSet<EntityKey>>>,
}

impl InvitationService {
    pub fn new(
        backend: Arc<dyn DeckBackend>,
        directory: Arc<MemberDirectory>,
        orchestrator: Arc<QueryCacheOrchestrator>,
    ) -> Self {
        Self {
            backend,
            directory,
            orchestrator,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn accept(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        caller_role: MemberRole,
        snapshot: &AggregationSnapshot,
    ) -> Result<MemberStatus, DeckError> {
        self.decide(
            InvitationAction::Accept,
            workspace_id,
            member_email,
            caller_role,
            snapshot,
        )
        .await
    }

    pub async fn decline(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        caller_role: MemberRole,
        snapshot: &AggregationSnapshot,
    ) -> Result<MemberStatus, DeckError> {
        self.decide(
            InvitationAction::Decline,
            workspace_id,
            member_email,
            caller_role,
            snapshot,
        )
        .await
    }

    async fn decide(
        &self,
        action: InvitationAction,
        workspace_id: WorkspaceId,
        member_email: &str,
        caller_role: MemberRole,
        snapshot: &AggregationSnapshot,
    ) -> Result<MemberStatus, DeckError> {
        authorize(caller_role, action)?;
        let acting = resolve_owner(workspace_id, snapshot)?;

        // Unknown status (list not loaded) is left for the server to judge.
        let target = match self.directory.status_of(workspace_id, member_email) {
            Some(current) => transition(current, action)?,
            None => match action {
                InvitationAction::Accept => MemberStatus::Approved,
                InvitationAction::Decline => MemberStatus::Declined,
            },
        };

        let _guard = InFlightGuard::acquire(
            &self.in_flight,
            (workspace_id, member_email.to_lowercase()),
        )?;

        let result = match action {
            InvitationAction::Accept => {
                self.backend
                    .verify_invitation(workspace_id, member_email, &acting)
                    .await
            }
            InvitationAction::Decline => {
                self.backend
                    .disprove_invitation(workspace_id, member_email, &acting)
                    .await
            }
        };

        if let Err(e) = result {
            log::warn!(
                "Invitations: {} {} in workspace {} failed: {}",
                action.as_str(),
                member_email,
                workspace_id,
                e
            );
            return Err(e.into());
        }

        log::info!(
            "Invitations: {} {} in workspace {} as {}",
            action.as_str(),
            member_email,
            workspace_id,
            acting
        );
        let mutation = match action {
            InvitationAction::Accept => Mutation::AcceptInvitation { workspace_id },
            InvitationAction::Decline => Mutation::DeclineInvitation { workspace_id },
        };
        self.orchestrator.on_success(&mutation);
        Ok(target)
    }

    pub async fn invite(
        &self,
        workspace_id: WorkspaceId,
        invitee_email: &str,
        snapshot: &AggregationSnapshot,
    ) -> Result<(), DeckError> {
        let invitee = validate_invitee(invitee_email)?;
        let acting = resolve_owner(workspace_id, snapshot)?;
        let _guard = InFlightGuard::acquire(&self.in_flight, (workspace_id, invitee.clone()))?;

        self.backend
            .invite_member(workspace_id, &invitee, &acting)
            .await
            .map_err(|e| {
                log::warn!("Invitations: inviting {} to {} failed: {}", invitee, workspace_id, e);
                DeckError::from(e)
            })?;

        log::info!("Invitations: invited {} to workspace {}", invitee, workspace_id);
        self.orchestrator
            .on_success(&Mutation::InviteMember { workspace_id });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryQueryCache, QueryKey};
    use crate::snapshot::SnapshotBuilder;
    use crate::test_support::{email, member, workspace, Call, FakeBackend};
    use tokio_util::sync::CancellationToken;

    const ALL: [MemberStatus; 4] = [
        MemberStatus::Pending,
        MemberStatus::Joined,
        MemberStatus::Approved,
        MemberStatus::Declined,
    ];

    struct Fixture {
        backend: Arc<FakeBackend>,
        directory: Arc<MemberDirectory>,
        cache: Arc<MemoryQueryCache>,
        service: InvitationService,
        snapshot: AggregationSnapshot,
    }

    async fn fixture(status: MemberStatus) -> Fixture {
        let backend = FakeBackend::new();
        backend.with_members(1, vec![member("new@x.io", MemberRole::Member, status)]);
        let mut builder = SnapshotBuilder::new(1);
        builder.insert(email("owner@x.io"), vec![workspace(1, "Ops"), workspace(2, "Design")]);
        let snapshot = builder.build();

        let directory = Arc::new(MemberDirectory::new());
        directory
            .load(backend.as_ref(), 1, &snapshot, &CancellationToken::new())
            .await
            .unwrap();

        let cache = Arc::new(MemoryQueryCache::new());
        let orchestrator = Arc::new(QueryCacheOrchestrator::new(cache.clone()));
        let service = InvitationService::new(backend.clone(), directory.clone(), orchestrator);
        Fixture {
            backend,
            directory,
            cache,
            service,
            snapshot,
        }
    }

    #[test]
    fn test_terminal_states_never_return_to_open() {
        for from in ALL {
            for action in [InvitationAction::Accept, InvitationAction::Decline] {
                if let Ok(to) = transition(from, action) {
                    assert!(to.is_terminal());
                    assert!(!from.is_terminal());
                }
            }
        }
        for action in [InvitationAction::Accept, InvitationAction::Decline] {
            assert!(transition(MemberStatus::Approved, action).is_err());
            assert!(transition(MemberStatus::Declined, action).is_err());
        }
    }

    #[test]
    fn test_role_gate() {
        assert!(authorize(MemberRole::Owner, InvitationAction::Accept).is_ok());
        assert!(authorize(MemberRole::Admin, InvitationAction::Decline).is_ok());
        assert!(matches!(
            authorize(MemberRole::Member, InvitationAction::Accept),
            Err(DeckError::Forbidden(_))
        ));
    }

    #[test]
    fn test_validate_invitee() {
        assert_eq!(validate_invitee(" New@X.io ").unwrap(), "new@x.io");
        assert!(matches!(
            validate_invitee("not-an-email"),
            Err(DeckError::ValidationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_member_caller_accept_is_forbidden_and_touches_no_cache() {
        let fx = fixture(MemberStatus::Joined).await;
        let err = fx
            .service
            .accept(1, "new@x.io", MemberRole::Member, &fx.snapshot)
            .await
            .unwrap_err();

        assert!(matches!(err, DeckError::Forbidden(_)));
        assert!(fx.cache.invalidated_keys().is_empty());
        assert_eq!(fx.backend.calls(), vec![Call::ListMembers(1, "owner@x.io".to_string())]);
    }

    #[tokio::test]
    async fn test_decline_invalidates_only_that_member_list() {
        let fx = fixture(MemberStatus::Pending).await;
        let status = fx
            .service
            .decline(1, "new@x.io", MemberRole::Owner, &fx.snapshot)
            .await
            .unwrap();

        assert_eq!(status, MemberStatus::Declined);
        assert_eq!(fx.cache.invalidated_keys(), vec![QueryKey::MemberList { workspace_id: 1 }]);
        assert_eq!(fx.backend.member_status(1, "new@x.io"), Some(MemberStatus::Declined));
        // Cached row is untouched until the list is reloaded.
        assert_eq!(fx.directory.status_of(1, "new@x.io"), Some(MemberStatus::Pending));
    }

    #[tokio::test]
    async fn test_accept_from_terminal_state_is_rejected_before_dispatch() {
        let fx = fixture(MemberStatus::Approved).await;
        let err = fx
            .service
            .accept(1, "new@x.io", MemberRole::Admin, &fx.snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::InvalidTransition { .. }));
        assert!(!fx
            .backend
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Verify(..))));
    }

    #[tokio::test]
    async fn test_failed_mutation_invalidates_nothing() {
        let fx = fixture(MemberStatus::Joined).await;
        fx.backend.fail_mutations(true);
        let err = fx
            .service
            .accept(1, "new@x.io", MemberRole::Owner, &fx.snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::NetworkFailure(_)));
        assert!(fx.cache.invalidated_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_owner_dispatches_nothing() {
        let fx = fixture(MemberStatus::Joined).await;
        let err = fx
            .service
            .accept(42, "new@x.io", MemberRole::Owner, &fx.snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::OwnerUnresolved(42)));
        assert!(err.notice().is_none());
    }

    #[tokio::test]
    async fn test_invite_posts_and_invalidates_member_list() {
        let fx = fixture(MemberStatus::Joined).await;
        fx.service.invite(2, "Guest@X.io", &fx.snapshot).await.unwrap();

        assert!(fx
            .backend
            .calls()
            .contains(&Call::Invite(2, "guest@x.io".to_string(), "owner@x.io".to_string())));
        assert_eq!(fx.cache.invalidated_keys(), vec![QueryKey::MemberList { workspace_id: 2 }]);
    }

    #[tokio::test]
    async fn test_concurrent_mutation_on_same_member_is_pending() {
        let fx = fixture(MemberStatus::Joined).await;
        let held = InFlightGuard::acquire(&fx.service.in_flight, (1, "new@x.io".to_string())).unwrap();

        let err = fx
            .service
            .accept(1, "new@x.io", MemberRole::Owner, &fx.snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::MutationPending(_)));

        drop(held);
        assert!(fx
            .service
            .accept(1, "new@x.io", MemberRole::Owner, &fx.snapshot)
            .await
            .is_ok());
    }
}
