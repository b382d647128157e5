//! In-memory backend and fixtures shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::api::{ApiError, DeckBackend};
use crate::types::{
    Card, CardDraft, CardId, CardPatch, LinkedEmail, Member, MemberRole, MemberStatus,
    PersonalReminder, ReminderId, ScheduleId, Workspace, WorkspaceId, WorkspaceType,
};

pub fn email(raw: &str) -> LinkedEmail {
    LinkedEmail::parse(raw).unwrap()
}

pub fn workspace(id: WorkspaceId, title: &str) -> Workspace {
    Workspace {
        id,
        title: title.to_string(),
        description: String::new(),
        kind: WorkspaceType::Workspace,
        extra_data: None,
    }
}

pub fn typed_workspace(id: WorkspaceId, title: &str, kind: WorkspaceType) -> Workspace {
    Workspace {
        kind,
        ..workspace(id, title)
    }
}

pub fn member(email: &str, role: MemberRole, status: MemberStatus) -> Member {
    Member {
        id: 0,
        email: email.to_string(),
        first_name: String::new(),
        last_name: String::new(),
        profile_picture_url: format!("https://img.example.com/{email}.png"),
        role,
        status,
    }
}

pub fn card(id: CardId, workspace_id: WorkspaceId, title: &str) -> Card {
    Card {
        id,
        workspace_id,
        list_id: 1,
        title: title.to_string(),
        description: String::new(),
        status: None,
        priority: None,
        position: 1,
    }
}

pub fn wall_clock(raw: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M").unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListWorkspaces(String),
    DeleteWorkspace(WorkspaceId, String),
    ListMembers(WorkspaceId, String),
    CurrentUser(WorkspaceId, String),
    Verify(WorkspaceId, String, String),
    Disprove(WorkspaceId, String, String),
    Invite(WorkspaceId, String, String),
    GetReminder(ScheduleId, String),
    AddReminder(ScheduleId, String),
    UpdateReminder(ReminderId, NaiveDateTime, String),
    RemoveReminder(ReminderId, String),
    CreateCard(WorkspaceId, String),
    UpdateCard(CardId, String),
}

/// Calls that can be held open until the test releases them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GateKey {
    Workspaces(LinkedEmail),
    Members(WorkspaceId),
    Caller(WorkspaceId),
    Reminder(ScheduleId),
}

#[derive(Default)]
pub struct FakeBackend {
    workspaces: Mutex<HashMap<LinkedEmail, Vec<Workspace>>>,
    failing: Mutex<HashSet<LinkedEmail>>,
    gates: Mutex<HashMap<GateKey, Arc<Notify>>>,
    members: Mutex<HashMap<WorkspaceId, Vec<Member>>>,
    callers: Mutex<HashMap<(WorkspaceId, LinkedEmail), Member>>,
    reminders: Mutex<HashMap<ScheduleId, PersonalReminder>>,
    fail_mutations: AtomicBool,
    silent_adds: AtomicBool,
    next_reminder_id: AtomicI64,
    cards: Mutex<HashMap<CardId, Card>>,
    next_card_id: AtomicI64,
    calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_workspaces(&self, owner: &str, workspaces: Vec<Workspace>) {
        self.workspaces.lock().insert(email(owner), workspaces);
    }

    pub fn with_card(&self, card: Card) {
        self.cards.lock().insert(card.id, card);
    }

    pub fn card(&self, card_id: CardId) -> Option<Card> {
        self.cards.lock().get(&card_id).cloned()
    }

    pub fn fail_email(&self, owner: &str) {
        self.failing.lock().insert(email(owner));
    }

    pub fn heal_email(&self, owner: &str) {
        self.failing.lock().remove(&email(owner));
    }

    fn gate(&self, key: GateKey) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates.lock().insert(key, notify.clone());
        notify
    }

    /// The next `list_workspaces` for `owner` blocks until the handle is notified.
    pub fn gate_email(&self, owner: &str) -> Arc<Notify> {
        self.gate(GateKey::Workspaces(email(owner)))
    }

    /// The next `list_members` for `workspace_id` answers with the rows as they
    /// were when it was called, but only once the handle is notified.
    pub fn gate_members(&self, workspace_id: WorkspaceId) -> Arc<Notify> {
        self.gate(GateKey::Members(workspace_id))
    }

    pub fn gate_caller(&self, workspace_id: WorkspaceId) -> Arc<Notify> {
        self.gate(GateKey::Caller(workspace_id))
    }

    pub fn gate_reminder(&self, schedule_id: ScheduleId) -> Arc<Notify> {
        self.gate(GateKey::Reminder(schedule_id))
    }

    /// Gates are one-shot: the first call through takes it.
    async fn pass_gate(&self, key: GateKey) {
        let gate = self.gates.lock().remove(&key);
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    /// Adds succeed but the response carries no reminder body.
    pub fn silent_adds(&self, silent: bool) {
        self.silent_adds.store(silent, Ordering::SeqCst);
    }

    pub fn set_member_status(&self, workspace_id: WorkspaceId, member_email: &str, status: MemberStatus) {
        self.set_status(workspace_id, member_email, status);
    }

    pub fn with_members(&self, workspace_id: WorkspaceId, members: Vec<Member>) {
        self.members.lock().insert(workspace_id, members);
    }

    pub fn with_caller(&self, workspace_id: WorkspaceId, acting: &str, role: MemberRole) {
        self.callers.lock().insert(
            (workspace_id, email(acting)),
            member(acting, role, MemberStatus::Approved),
        );
    }

    pub fn with_reminder(&self, reminder: PersonalReminder) {
        self.reminders.lock().insert(reminder.schedule_id, reminder);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn member_status(&self, workspace_id: WorkspaceId, member_email: &str) -> Option<MemberStatus> {
        self.members
            .lock()
            .get(&workspace_id)
            .and_then(|ms| ms.iter().find(|m| m.email == member_email))
            .map(|m| m.status)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn mutation_gate(&self) -> Result<(), ApiError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            Err(ApiError::Status {
                status: 500,
                message: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn set_status(&self, workspace_id: WorkspaceId, member_email: &str, status: MemberStatus) {
        if let Some(members) = self.members.lock().get_mut(&workspace_id) {
            for m in members.iter_mut().filter(|m| m.email == member_email) {
                m.status = status;
            }
        }
    }
}

#[async_trait]
impl DeckBackend for FakeBackend {
    async fn list_workspaces(&self, owner: &LinkedEmail) -> Result<Vec<Workspace>, ApiError> {
        self.record(Call::ListWorkspaces(owner.to_string()));
        self.pass_gate(GateKey::Workspaces(owner.clone())).await;
        if self.failing.lock().contains(owner) {
            return Err(ApiError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(self.workspaces.lock().get(owner).cloned().unwrap_or_default())
    }

    async fn delete_workspace(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.record(Call::DeleteWorkspace(workspace_id, acting.to_string()));
        self.mutation_gate()?;
        if let Some(list) = self.workspaces.lock().get_mut(acting) {
            list.retain(|w| w.id != workspace_id);
        }
        Ok(())
    }

    async fn list_members(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Vec<Member>, ApiError> {
        self.record(Call::ListMembers(workspace_id, acting.to_string()));
        let rows = self.members.lock().get(&workspace_id).cloned().unwrap_or_default();
        self.pass_gate(GateKey::Members(workspace_id)).await;
        Ok(rows)
    }

    async fn current_user_info(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Member, ApiError> {
        self.record(Call::CurrentUser(workspace_id, acting.to_string()));
        self.pass_gate(GateKey::Caller(workspace_id)).await;
        self.callers
            .lock()
            .get(&(workspace_id, acting.clone()))
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                message: "not a member".to_string(),
            })
    }

    async fn verify_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.record(Call::Verify(workspace_id, member_email.to_string(), acting.to_string()));
        self.mutation_gate()?;
        self.set_status(workspace_id, member_email, MemberStatus::Approved);
        Ok(())
    }

    async fn disprove_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.record(Call::Disprove(workspace_id, member_email.to_string(), acting.to_string()));
        self.mutation_gate()?;
        self.set_status(workspace_id, member_email, MemberStatus::Declined);
        Ok(())
    }

    async fn invite_member(
        &self,
        workspace_id: WorkspaceId,
        invitee_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.record(Call::Invite(workspace_id, invitee_email.to_string(), acting.to_string()));
        self.mutation_gate()?;
        self.members
            .lock()
            .entry(workspace_id)
            .or_default()
            .push(member(invitee_email, MemberRole::Member, MemberStatus::Pending));
        Ok(())
    }

    async fn get_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        _workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError> {
        self.record(Call::GetReminder(schedule_id, acting.to_string()));
        self.pass_gate(GateKey::Reminder(schedule_id)).await;
        Ok(self.reminders.lock().get(&schedule_id).cloned())
    }

    async fn add_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError> {
        self.record(Call::AddReminder(schedule_id, acting.to_string()));
        self.mutation_gate()?;
        let reminder = PersonalReminder {
            id: self.next_reminder_id.fetch_add(1, Ordering::SeqCst) + 100,
            schedule_id,
            time: None,
            workspace_id,
        };
        self.reminders.lock().insert(schedule_id, reminder.clone());
        if self.silent_adds.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(reminder))
    }

    async fn update_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        time: NaiveDateTime,
        _workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.record(Call::UpdateReminder(reminder_id, time, acting.to_string()));
        self.mutation_gate()?;
        if let Some(r) = self.reminders.lock().get_mut(&schedule_id) {
            r.time = Some(time);
        }
        Ok(())
    }

    async fn remove_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        _workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.record(Call::RemoveReminder(reminder_id, acting.to_string()));
        self.mutation_gate()?;
        self.reminders.lock().remove(&schedule_id);
        Ok(())
    }

    async fn create_card(
        &self,
        workspace_id: WorkspaceId,
        draft: &CardDraft,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError> {
        self.record(Call::CreateCard(workspace_id, acting.to_string()));
        self.mutation_gate()?;
        let card = Card {
            id: self.next_card_id.fetch_add(1, Ordering::SeqCst) + 500,
            workspace_id,
            list_id: draft.list_id,
            title: draft.title.clone(),
            description: String::new(),
            status: None,
            priority: None,
            position: draft.position,
        };
        self.cards.lock().insert(card.id, card.clone());
        Ok(card)
    }

    async fn update_card(
        &self,
        card_id: CardId,
        _workspace_id: WorkspaceId,
        patch: &CardPatch,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError> {
        self.record(Call::UpdateCard(card_id, acting.to_string()));
        self.mutation_gate()?;
        let mut cards = self.cards.lock();
        let card = cards.get_mut(&card_id).ok_or_else(|| ApiError::Status {
            status: 404,
            message: "schedule not found".to_string(),
        })?;
        if let Some(title) = &patch.title {
            card.title = title.clone();
        }
        if let Some(description) = &patch.description {
            card.description = description.clone();
        }
        if patch.status.is_some() {
            card.status = patch.status.clone();
        }
        if patch.priority.is_some() {
            card.priority = patch.priority.clone();
        }
        if let Some(list_id) = patch.list_id {
            card.list_id = list_id;
        }
        if let Some(position) = patch.position {
            card.position = position;
        }
        Ok(card.clone())
    }
}
