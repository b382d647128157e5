use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

pub type WorkspaceId = i64;
pub type ScheduleId = i64;
pub type ReminderId = i64;
pub type CardId = i64;
pub type ListId = i64;

/// An email identity linked to the current session.
///
/// Uniqueness is by value; the address is trimmed and lowercased on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LinkedEmail(String);

impl LinkedEmail {
    /// Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkedEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for LinkedEmail {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        LinkedEmail::parse(&raw).ok_or_else(|| serde::de::Error::custom("blank email"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceType {
    Personal,
    #[default]
    Workspace,
    #[serde(other)]
    Unknown,
}

impl WorkspaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceType::Personal => "personal",
            WorkspaceType::Workspace => "workspace",
            WorkspaceType::Unknown => "unknown",
        }
    }
}

/// A board/space as returned by `GET /workspace?email=`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    #[serde(alias = "ID")]
    pub id: WorkspaceId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: WorkspaceType,
    #[serde(default, alias = "extra_data", skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    /// Owners and admins may approve or decline join requests.
    pub fn can_moderate(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Pending,
    Joined,
    Approved,
    Declined,
}

impl MemberStatus {
    /// Approved and declined end an invitation attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MemberStatus::Approved | MemberStatus::Declined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Pending => "pending",
            MemberStatus::Joined => "joined",
            MemberStatus::Approved => "approved",
            MemberStatus::Declined => "declined",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workspace member row from `GET /workspace_user/members`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default, alias = "ID")]
    pub id: i64,
    pub email: String,
    #[serde(default, alias = "first_name")]
    pub first_name: String,
    #[serde(default, alias = "last_name")]
    pub last_name: String,
    #[serde(default, alias = "profile_picture")]
    pub profile_picture_url: String,
    pub role: MemberRole,
    #[serde(default)]
    pub status: MemberStatus,
}

/// A personal reminder on a card schedule, owned by one acting email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalReminder {
    #[serde(alias = "ID")]
    pub id: ReminderId,
    #[serde(alias = "schedule_id")]
    pub schedule_id: ScheduleId,
    #[serde(
        default,
        alias = "reminder_time",
        deserialize_with = "wire_time::deserialize_opt"
    )]
    pub time: Option<NaiveDateTime>,
    #[serde(default, alias = "workspace_id")]
    pub workspace_id: WorkspaceId,
}

/// A schedule card on a workspace board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    #[serde(alias = "ID")]
    pub id: CardId,
    #[serde(default, alias = "workspace_id")]
    pub workspace_id: WorkspaceId,
    #[serde(default, alias = "list_id")]
    pub list_id: ListId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub position: i64,
}

/// A new card at the end of (or inside) a board column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDraft {
    pub list_id: ListId,
    pub title: String,
    pub position: i64,
}

/// Fields to change on an existing card. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub visibility: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub all_day: Option<bool>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub list_id: Option<ListId>,
    pub position: Option<i64>,
}

impl CardPatch {
    pub fn is_empty(&self) -> bool {
        *self == CardPatch::default()
    }

    /// Whether the change can move the card between columns or in or out of
    /// a board filter (search, status, priority, due dates). Description,
    /// location, visibility and all-day only change the card's detail view.
    pub fn reshapes_board(&self) -> bool {
        self.title.is_some()
            || self.status.is_some()
            || self.priority.is_some()
            || self.start_time.is_some()
            || self.end_time.is_some()
            || self.list_id.is_some()
            || self.position.is_some()
    }
}

/// Lenient timestamp parsing for server payloads.
pub mod wire_time {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer};

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];

    /// Parses RFC 3339 (converted to UTC) or one of the naive layouts the API emits.
    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.naive_utc());
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => parse(value)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp: {value}"))),
        }
    }
}
