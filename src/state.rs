//! Dashboard state: the one place that owns the published snapshot.
//!
//! Every refresh builds a fresh `AggregationSnapshot` and swaps the `Arc`
//! wholesale. Refreshes are stamped with a generation; a refresh that settles
//! after a newer one started (or after sign-out) is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::WorkspaceAggregator;
use crate::api::DeckBackend;
use crate::cache::{CacheEvent, Mutation, QueryCache, QueryCacheOrchestrator, QueryKey};
use crate::error::DeckError;
use crate::invitation::InvitationService;
use crate::members::{AvatarStrip, MemberDirectory, MemberView};
use crate::owner::resolve_owner;
use crate::pagination::{GroupView, PaginationFilterEngine};
use crate::registry::{IdentityProvider, LinkedEmailRegistry};
use crate::reminders::{Clock, ReminderScheduler};
use crate::snapshot::AggregationSnapshot;
use crate::types::{
    Card, CardDraft, CardId, CardPatch, LinkedEmail, Member, MemberRole, MemberStatus,
    PersonalReminder, ReminderId, ScheduleId, WorkspaceId,
};

/// Cancellation handle for one open workspace view. Dropping it abandons the
/// view's outstanding fetches.
pub struct ViewTicket {
    workspace_id: WorkspaceId,
    token: CancellationToken,
}

impl ViewTicket {
    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for ViewTicket {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct Dashboard {
    backend: Arc<dyn DeckBackend>,
    registry: LinkedEmailRegistry,
    aggregator: WorkspaceAggregator,
    snapshot: RwLock<Arc<AggregationSnapshot>>,
    generation: AtomicU64,
    members: Arc<MemberDirectory>,
    invitations: InvitationService,
    reminders: ReminderScheduler,
    pagination: Mutex<PaginationFilterEngine>,
    orchestrator: Arc<QueryCacheOrchestrator>,
    /// Parent of every view token; replaced on sign-out.
    session: Mutex<CancellationToken>,
}

impl Dashboard {
    pub fn new(
        backend: Arc<dyn DeckBackend>,
        identity: Arc<dyn IdentityProvider>,
        cache: Arc<dyn QueryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let orchestrator = Arc::new(QueryCacheOrchestrator::new(cache));
        let members = Arc::new(MemberDirectory::new());
        Self {
            registry: LinkedEmailRegistry::new(identity),
            aggregator: WorkspaceAggregator::new(backend.clone()),
            snapshot: RwLock::new(Arc::new(AggregationSnapshot::empty())),
            generation: AtomicU64::new(0),
            invitations: InvitationService::new(backend.clone(), members.clone(), orchestrator.clone()),
            reminders: ReminderScheduler::new(backend.clone(), orchestrator.clone(), clock),
            members,
            pagination: Mutex::new(PaginationFilterEngine::default()),
            orchestrator,
            session: Mutex::new(CancellationToken::new()),
            backend,
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<AggregationSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn orchestrator(&self) -> &Arc<QueryCacheOrchestrator> {
        &self.orchestrator
    }

    pub fn members(&self) -> &MemberDirectory {
        &self.members
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub fn pagination(&self) -> MutexGuard<'_, PaginationFilterEngine> {
        self.pagination.lock()
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Swap in `snapshot` if no newer generation has started. Returns whether it was published.
    fn publish(&self, snapshot: AggregationSnapshot) -> bool {
        let latest = self.generation.load(Ordering::SeqCst);
        if snapshot.generation() != latest {
            log::debug!(
                "Dashboard: dropping stale snapshot generation {} (latest {})",
                snapshot.generation(),
                latest
            );
            return false;
        }
        *self.snapshot.write() = Arc::new(snapshot);
        true
    }

    /// Re-read the registry and re-aggregate every linked email.
    pub async fn refresh(&self) -> Arc<AggregationSnapshot> {
        let generation = self.next_generation();
        let emails = self.registry.get().await;
        let snapshot = if emails.is_empty() {
            log::info!("Dashboard: no linked emails (generation {})", generation);
            AggregationSnapshot::empty_at(generation)
        } else {
            self.aggregator.aggregate(&emails, generation).await
        };
        self.publish(snapshot);
        self.snapshot()
    }

    /// Re-fetch only the emails that failed in the current snapshot.
    ///
    /// A partial retry merges into the published snapshot, so while a newer
    /// refresh is still outstanding it becomes a full refresh instead.
    pub async fn retry_failed(&self) -> Arc<AggregationSnapshot> {
        let previous = self.snapshot();
        if self.generation.load(Ordering::SeqCst) != previous.generation() {
            log::debug!(
                "Dashboard: refresh in flight past generation {}, retrying in full",
                previous.generation()
            );
            return self.refresh().await;
        }
        let generation = self.next_generation();
        let snapshot = self.aggregator.retry_failed(&previous, generation).await;
        self.publish(snapshot);
        self.snapshot()
    }

    pub fn open_workspace_view(&self, workspace_id: WorkspaceId) -> ViewTicket {
        ViewTicket {
            workspace_id,
            token: self.session.lock().child_token(),
        }
    }

    pub async fn load_members(&self, ticket: &ViewTicket) -> Result<Arc<Vec<Member>>, DeckError> {
        let snapshot = self.snapshot();
        self.members
            .load(self.backend.as_ref(), ticket.workspace_id, &snapshot, &ticket.token)
            .await
    }

    /// Avatar strips for every workspace in the snapshot.
    pub async fn load_all_members(&self) -> HashMap<WorkspaceId, AvatarStrip> {
        let snapshot = self.snapshot();
        let token = self.session.lock().child_token();
        self.members
            .load_all(self.backend.as_ref(), &snapshot, &token)
            .await
    }

    /// The caller's role in `workspace_id`, fetched once and then remembered.
    pub async fn caller_role(&self, workspace_id: WorkspaceId) -> Result<MemberRole, DeckError> {
        if let Some(role) = self.members.caller_role(workspace_id) {
            return Ok(role);
        }
        let snapshot = self.snapshot();
        let token = self.session.lock().child_token();
        self.members
            .load_caller(self.backend.as_ref(), workspace_id, &snapshot, &token)
            .await
    }

    pub async fn member_views(&self, workspace_id: WorkspaceId) -> Result<Vec<MemberView>, DeckError> {
        let role = self.caller_role(workspace_id).await?;
        Ok(self.members.member_views(workspace_id, role))
    }

    pub async fn accept_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
    ) -> Result<MemberStatus, DeckError> {
        let role = self.caller_role(workspace_id).await?;
        let snapshot = self.snapshot();
        self.invitations
            .accept(workspace_id, member_email, role, &snapshot)
            .await
    }

    pub async fn decline_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
    ) -> Result<MemberStatus, DeckError> {
        let role = self.caller_role(workspace_id).await?;
        let snapshot = self.snapshot();
        self.invitations
            .decline(workspace_id, member_email, role, &snapshot)
            .await
    }

    pub async fn invite_member(
        &self,
        workspace_id: WorkspaceId,
        invitee_email: &str,
    ) -> Result<(), DeckError> {
        let snapshot = self.snapshot();
        self.invitations
            .invite(workspace_id, invitee_email, &snapshot)
            .await
    }

    pub async fn fetch_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
    ) -> Result<Option<PersonalReminder>, DeckError> {
        let snapshot = self.snapshot();
        let token = self.session.lock().child_token();
        self.reminders
            .fetch(schedule_id, workspace_id, &snapshot, &token)
            .await
    }

    pub async fn add_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
    ) -> Result<Option<PersonalReminder>, DeckError> {
        let snapshot = self.snapshot();
        self.reminders.add(schedule_id, workspace_id, &snapshot).await
    }

    pub async fn update_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        wall_clock: NaiveDateTime,
        workspace_id: WorkspaceId,
    ) -> Result<NaiveDateTime, DeckError> {
        let snapshot = self.snapshot();
        self.reminders
            .update(reminder_id, schedule_id, wall_clock, workspace_id, &snapshot)
            .await
    }

    pub async fn remove_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
    ) -> Result<(), DeckError> {
        let snapshot = self.snapshot();
        self.reminders
            .remove(reminder_id, schedule_id, workspace_id, &snapshot)
            .await
    }

    /// Delete a workspace as its owning email. The snapshot is left alone;
    /// the resulting invalidation triggers a re-aggregation.
    pub async fn delete_workspace(&self, workspace_id: WorkspaceId) -> Result<LinkedEmail, DeckError> {
        let snapshot = self.snapshot();
        let owner = resolve_owner(workspace_id, &snapshot)?;
        self.backend
            .delete_workspace(workspace_id, &owner)
            .await
            .map_err(|e| {
                log::warn!("Dashboard: deleting workspace {} failed: {}", workspace_id, e);
                DeckError::from(e)
            })?;

        log::info!("Dashboard: deleted workspace {} as {}", workspace_id, owner);
        self.orchestrator.on_success(&Mutation::DeleteWorkspace {
            email: owner.clone(),
            workspace_id,
        });
        Ok(owner)
    }

    /// Create a card as the workspace's owning email.
    pub async fn create_card(&self, workspace_id: WorkspaceId, draft: &CardDraft) -> Result<Card, DeckError> {
        if draft.title.trim().is_empty() {
            return Err(DeckError::ValidationFailure("card title is empty".to_string()));
        }
        let snapshot = self.snapshot();
        let owner = resolve_owner(workspace_id, &snapshot)?;
        let card = self
            .backend
            .create_card(workspace_id, draft, &owner)
            .await
            .map_err(|e| {
                log::warn!("Dashboard: creating card in workspace {} failed: {}", workspace_id, e);
                DeckError::from(e)
            })?;

        log::info!("Dashboard: created card {} in workspace {} as {}", card.id, workspace_id, owner);
        self.orchestrator
            .on_success(&Mutation::CardCreated { workspace_id });
        Ok(card)
    }

    /// Update a card as the workspace's owning email. Board columns are
    /// invalidated only when the change can move or re-filter the card.
    pub async fn update_card(
        &self,
        card_id: CardId,
        workspace_id: WorkspaceId,
        patch: &CardPatch,
    ) -> Result<Card, DeckError> {
        if patch.is_empty() {
            return Err(DeckError::ValidationFailure(format!("no changes for card {}", card_id)));
        }
        let snapshot = self.snapshot();
        let owner = resolve_owner(workspace_id, &snapshot)?;
        let card = self
            .backend
            .update_card(card_id, workspace_id, patch, &owner)
            .await
            .map_err(|e| {
                log::warn!("Dashboard: updating card {} failed: {}", card_id, e);
                DeckError::from(e)
            })?;

        log::info!("Dashboard: updated card {} in workspace {} as {}", card_id, workspace_id, owner);
        self.orchestrator.on_success(&Mutation::CardUpdated {
            workspace_id,
            position_or_filters_changed: patch.reshapes_board(),
        });
        Ok(card)
    }

    /// React to one invalidation.
    pub async fn process_event(&self, event: CacheEvent) {
        let CacheEvent::Invalidated(key) = event;
        match key {
            QueryKey::WorkspaceList { email } => {
                log::info!("Dashboard: workspace list for {} invalidated, re-aggregating", email);
                self.refresh().await;
            }
            QueryKey::MemberList { workspace_id } => {
                if self.members.members(workspace_id).is_none() {
                    return;
                }
                let ticket = self.open_workspace_view(workspace_id);
                if let Err(e) = self.load_members(&ticket).await {
                    if !e.is_silent() {
                        log::warn!("Dashboard: reloading members of {} failed: {}", workspace_id, e);
                    }
                }
            }
            // Reminder and board queries are refetched by their own subscribers.
            other => log::debug!("Dashboard: no local state for {:?}", other),
        }
    }

    /// Apply invalidations as they are broadcast, until sign-out.
    pub fn spawn_invalidation_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.orchestrator.subscribe();
        let stop = self.session.lock().clone();
        let dashboard = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => dashboard.process_event(event).await,
                        Err(RecvError::Lagged(missed)) => {
                            log::warn!("Dashboard: missed {} invalidation(s), refreshing everything", missed);
                            dashboard.refresh().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("Dashboard: invalidation listener stopped");
        })
    }

    pub fn render_groups(&self) -> Vec<GroupView> {
        let snapshot = self.snapshot();
        self.pagination.lock().render(&snapshot)
    }

    /// Discard everything derived from the session and abandon in-flight work.
    pub fn sign_out(&self) {
        let generation = self.next_generation();
        let previous = std::mem::replace(&mut *self.session.lock(), CancellationToken::new());
        previous.cancel();

        *self.snapshot.write() = Arc::new(AggregationSnapshot::empty_at(generation));
        self.members.clear();
        self.reminders.clear();
        self.pagination.lock().reset();
        log::info!("Dashboard: signed out");
    }
}
