//! Schedule cards on a workspace board.

use chrono::NaiveDateTime;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ApiError, HttpBackend};
use crate::types::{Card, CardDraft, CardId, CardPatch, LinkedEmail, ListId, WorkspaceId};

const SCHEDULE_PATH: &str = "schedule";

/// `yyyy-MM-dd HH:mm:ss.SSS`, the card endpoints' start/end layout.
pub const CARD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Serialize)]
struct CreateCardBody<'a> {
    workspace_id: WorkspaceId,
    list_id: ListId,
    title: &'a str,
    position: i64,
}

#[derive(Debug, Default, Serialize)]
struct UpdateCardBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    all_day: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    list_id: Option<ListId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<i64>,
}

impl<'a> UpdateCardBody<'a> {
    fn from_patch(patch: &'a CardPatch) -> Self {
        Self {
            title: patch.title.as_deref(),
            description: patch.description.as_deref(),
            location: patch.location.as_deref(),
            visibility: patch.visibility.as_deref(),
            status: patch.status.as_deref(),
            priority: patch.priority.as_deref(),
            all_day: patch.all_day,
            start_time: patch.start_time.map(format_card_time),
            end_time: patch.end_time.map(format_card_time),
            list_id: patch.list_id,
            position: patch.position,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CardBody {
    Card(Card),
    Wrapped { data: Card },
}

impl CardBody {
    fn into_card(self) -> Card {
        match self {
            CardBody::Card(card) | CardBody::Wrapped { data: card } => card,
        }
    }
}

fn format_card_time(time: NaiveDateTime) -> String {
    time.format(CARD_TIME_FORMAT).to_string()
}

impl HttpBackend {
    /// `POST /schedule`
    pub(super) async fn post_card(
        &self,
        workspace_id: WorkspaceId,
        draft: &CardDraft,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError> {
        let url = self.endpoint(SCHEDULE_PATH, &[])?;
        let request = self
            .request(Method::POST, url, Some((workspace_id, acting)))
            .json(&CreateCardBody {
                workspace_id,
                list_id: draft.list_id,
                title: &draft.title,
                position: draft.position,
            });
        let body: CardBody = self.send_json(request).await?;
        Ok(body.into_card())
    }

    /// `PUT /schedule/{id}`: only the fields set on `patch` are sent.
    pub(super) async fn put_card(
        &self,
        card_id: CardId,
        workspace_id: WorkspaceId,
        patch: &CardPatch,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError> {
        let url = self.endpoint(&format!("{}/{}", SCHEDULE_PATH, card_id), &[])?;
        let request = self
            .request(Method::PUT, url, Some((workspace_id, acting)))
            .json(&UpdateCardBody::from_patch(patch));
        let body: CardBody = self.send_json(request).await?;
        Ok(body.into_card())
    }
}
