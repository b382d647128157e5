//! Personal reminder CRUD.

use chrono::NaiveDateTime;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ApiError, HttpBackend};
use crate::reminders::WIRE_TIME_FORMAT;
use crate::types::{LinkedEmail, PersonalReminder, ReminderId, ScheduleId, WorkspaceId};

const REMINDER_PATH: &str = "personal-reminder";

#[derive(Debug, Serialize)]
struct AddReminderBody {
    schedule_id: ScheduleId,
}

#[derive(Debug, Serialize)]
struct UpdateReminderBody {
    reminder_id: ReminderId,
    time: String,
    schedule_id: ScheduleId,
}

#[derive(Debug, Serialize)]
struct RemoveReminderBody {
    reminder_id: ReminderId,
    schedule_id: ScheduleId,
}

/// A schedule without a reminder answers `{ "message": "..." }` instead of a row.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReminderBody {
    Reminder(PersonalReminder),
    Wrapped { data: PersonalReminder },
    Message {
        #[allow(dead_code)]
        message: String,
    },
}

fn parse_reminder_body(bytes: &[u8]) -> Option<PersonalReminder> {
    match serde_json::from_slice::<ReminderBody>(bytes) {
        Ok(ReminderBody::Reminder(reminder)) | Ok(ReminderBody::Wrapped { data: reminder }) => {
            Some(reminder)
        }
        Ok(ReminderBody::Message { .. }) | Err(_) => None,
    }
}

fn format_wire_time(time: NaiveDateTime) -> String {
    time.format(WIRE_TIME_FORMAT).to_string()
}

impl HttpBackend {
    /// `GET /personal-reminder?schedule_id=`
    pub(super) async fn fetch_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError> {
        let url = self.endpoint(REMINDER_PATH, &[("schedule_id", schedule_id.to_string())])?;
        let request = self.request(Method::GET, url, Some((workspace_id, acting)));
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(parse_reminder_body(&bytes))
    }

    /// `POST /personal-reminder`
    pub(super) async fn post_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError> {
        let url = self.endpoint(REMINDER_PATH, &[])?;
        let request = self
            .request(Method::POST, url, Some((workspace_id, acting)))
            .json(&AddReminderBody { schedule_id });
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(parse_reminder_body(&bytes))
    }

    /// `PUT /personal-reminder`
    pub(super) async fn put_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        time: NaiveDateTime,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(REMINDER_PATH, &[])?;
        let request = self
            .request(Method::PUT, url, Some((workspace_id, acting)))
            .json(&UpdateReminderBody {
                reminder_id,
                time: format_wire_time(time),
                schedule_id,
            });
        self.send(request).await?;
        Ok(())
    }

    /// `DELETE /personal-reminder`
    pub(super) async fn delete_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(REMINDER_PATH, &[])?;
        let request = self
            .request(Method::DELETE, url, Some((workspace_id, acting)))
            .json(&RemoveReminderBody {
                reminder_id,
                schedule_id,
            });
        self.send(request).await?;
        Ok(())
    }
}
