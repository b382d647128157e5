//! Personal reminders on card schedules.
//!
//! The server stores reminder times under a fixed downstream timezone
//! assumption, so every edited wall-clock time is sent shifted back by
//! `REMINDER_OFFSET_HOURS`. This is a fixed offset and not a timezone
//! conversion; values round-trip bit-for-bit with existing data only as long
//! as it stays that way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Local, NaiveDateTime};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::api::DeckBackend;
use crate::cache::{Mutation, QueryCacheOrchestrator};
use crate::error::DeckError;
use crate::owner::resolve_owner;
use crate::snapshot::AggregationSnapshot;
use crate::types::{LinkedEmail, PersonalReminder, ReminderId, ScheduleId, WorkspaceId};

pub const REMINDER_OFFSET_HOURS: i64 = 7;

/// `yyyy-MM-dd HH:mm`, as the reminder endpoints expect.
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

const INPUT_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// `stored = input - 7h`. Pure; identical input always yields identical output.
pub fn normalize_reminder_time(wall_clock: NaiveDateTime) -> NaiveDateTime {
    wall_clock - Duration::hours(REMINDER_OFFSET_HOURS)
}

/// Parses a datetime-local style input (`2024-06-01T10:00` or `2024-06-01 10:00`).
pub fn parse_wall_clock(raw: &str) -> Result<NaiveDateTime, DeckError> {
    let raw = raw.trim();
    INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| DeckError::ValidationFailure(format!("'{}' is not a date and time", raw)))
}

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

type ReminderKey = (ScheduleId, LinkedEmail);

pub struct ReminderScheduler {
    backend: Arc<dyn DeckBackend>,
    orchestrator: Arc<QueryCacheOrchestrator>,
    clock: Arc<dyn Clock>,
    /// At most one active reminder per (schedule, acting email). `None` marks a
    /// reminder the server created without sending its body back.
    active: RwLock<HashMap<ReminderKey, Option<PersonalReminder>>>,
    /// Bumped by `clear`; results of calls started before it are not indexed.
    epoch: AtomicU64,
}

impl ReminderScheduler {
    pub fn new(
        backend: Arc<dyn DeckBackend>,
        orchestrator: Arc<QueryCacheOrchestrator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            orchestrator,
            clock,
            active: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn active(&self, schedule_id: ScheduleId, owner: &LinkedEmail) -> Option<PersonalReminder> {
        self.active
            .read()
            .get(&(schedule_id, owner.clone()))
            .cloned()
            .flatten()
    }

    /// Whether `owner` already has a reminder on `schedule_id`, body known or not.
    pub fn has_active(&self, schedule_id: ScheduleId, owner: &LinkedEmail) -> bool {
        self.active.read().contains_key(&(schedule_id, owner.clone()))
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Write `entry` under `key` unless the scheduler was cleared since `epoch`.
    /// `None` removes the key.
    fn index(&self, epoch: u64, key: ReminderKey, entry: Option<Option<PersonalReminder>>) -> bool {
        let mut active = self.active.write();
        if self.epoch() != epoch {
            log::debug!("Reminders: dropping result for schedule {} (session ended)", key.0);
            return false;
        }
        match entry {
            Some(value) => {
                active.insert(key, value);
            }
            None => {
                active.remove(&key);
            }
        }
        true
    }

    pub async fn fetch(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        snapshot: &AggregationSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Option<PersonalReminder>, DeckError> {
        let owner = resolve_owner(workspace_id, snapshot)?;
        let epoch = self.epoch();

        let reminder = tokio::select! {
            _ = cancel.cancelled() => return Err(DeckError::Cancelled),
            result = self.backend.get_personal_reminder(schedule_id, workspace_id, &owner) => result?,
        };
        if cancel.is_cancelled() {
            return Err(DeckError::Cancelled);
        }

        let entry = reminder.clone().map(Some);
        if !self.index(epoch, (schedule_id, owner), entry) {
            return Err(DeckError::Cancelled);
        }
        Ok(reminder)
    }

    pub async fn add(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        snapshot: &AggregationSnapshot,
    ) -> Result<Option<PersonalReminder>, DeckError> {
        let owner = resolve_owner(workspace_id, snapshot)?;
        if self.has_active(schedule_id, &owner) {
            return Err(DeckError::ValidationFailure(format!(
                "schedule {} already has a reminder for {}",
                schedule_id, owner
            )));
        }
        let epoch = self.epoch();

        let mut created = self
            .backend
            .add_personal_reminder(schedule_id, workspace_id, &owner)
            .await
            .map_err(|e| self.failed("add", schedule_id, e))?;

        if created.is_none() {
            created = match self
                .backend
                .get_personal_reminder(schedule_id, workspace_id, &owner)
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    log::warn!(
                        "Reminders: reading back new reminder on schedule {} failed: {}",
                        schedule_id,
                        e
                    );
                    None
                }
            };
        }
        self.index(epoch, (schedule_id, owner.clone()), Some(created.clone()));

        log::info!("Reminders: added reminder on schedule {} for {}", schedule_id, owner);
        self.orchestrator
            .on_success(&Mutation::AddReminder { schedule_id });
        Ok(created)
    }

    /// Returns the value that was transmitted.
    pub async fn update(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        wall_clock: NaiveDateTime,
        workspace_id: WorkspaceId,
        snapshot: &AggregationSnapshot,
    ) -> Result<NaiveDateTime, DeckError> {
        let now = self.clock.now();
        if wall_clock < now {
            return Err(DeckError::ValidationFailure(format!(
                "reminder time {} is in the past",
                wall_clock.format(WIRE_TIME_FORMAT)
            )));
        }
        let owner = resolve_owner(workspace_id, snapshot)?;
        let stored = normalize_reminder_time(wall_clock);

        self.backend
            .update_personal_reminder(reminder_id, schedule_id, stored, workspace_id, &owner)
            .await
            .map_err(|e| self.failed("update", schedule_id, e))?;

        if let Some(Some(r)) = self.active.write().get_mut(&(schedule_id, owner)) {
            r.time = Some(stored);
        }
        log::info!(
            "Reminders: schedule {} reminder set to {} (sent {})",
            schedule_id,
            wall_clock.format(WIRE_TIME_FORMAT),
            stored.format(WIRE_TIME_FORMAT)
        );
        self.orchestrator
            .on_success(&Mutation::UpdateReminder { schedule_id });
        Ok(stored)
    }

    pub async fn remove(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        snapshot: &AggregationSnapshot,
    ) -> Result<(), DeckError> {
        let owner = resolve_owner(workspace_id, snapshot)?;
        self.backend
            .remove_personal_reminder(reminder_id, schedule_id, workspace_id, &owner)
            .await
            .map_err(|e| self.failed("remove", schedule_id, e))?;

        self.active.write().remove(&(schedule_id, owner));
        log::info!("Reminders: removed reminder {} on schedule {}", reminder_id, schedule_id);
        self.orchestrator
            .on_success(&Mutation::RemoveReminder { schedule_id });
        Ok(())
    }

    pub fn clear(&self) {
        let mut active = self.active.write();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        active.clear();
    }

    fn failed(&self, op: &str, schedule_id: ScheduleId, err: crate::api::ApiError) -> DeckError {
        log::warn!("Reminders: {} on schedule {} failed: {}", op, schedule_id, err);
        DeckError::from(err)
    }
}
