//! REST client for the workspace backend.
//!
//! All requests carry the session's bearer token. Operations scoped to a
//! workspace also carry the acting identity in `X-User-Email` and the target
//! in `X-Workspace-ID`; the server authorizes against that pair.
//!
//! Modules:
//! - workspaces: workspace listing and deletion
//! - members: member listing, caller info, invitation verdicts, invites
//! - reminders: personal reminder CRUD
//! - cards: schedule card create and update

pub mod cards;
pub mod members;
pub mod reminders;
pub mod workspaces;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::types::{
    Card, CardDraft, CardId, CardPatch, LinkedEmail, Member, PersonalReminder, ReminderId,
    ScheduleId, Workspace, WorkspaceId,
};

pub const USER_EMAIL_HEADER: &str = "X-User-Email";
pub const WORKSPACE_ID_HEADER: &str = "X-Workspace-ID";

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Session token rejected")]
    Unauthorized,
    #[error("API error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Backend seam
// ============================================================================

/// Logical request/response contract consumed by the dashboard core.
///
/// `HttpBackend` is the production implementation; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait DeckBackend: Send + Sync {
    async fn list_workspaces(&self, email: &LinkedEmail) -> Result<Vec<Workspace>, ApiError>;

    async fn delete_workspace(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError>;

    async fn list_members(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Vec<Member>, ApiError>;

    /// The acting identity's own membership row (source of the caller role).
    async fn current_user_info(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Member, ApiError>;

    async fn verify_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError>;

    async fn disprove_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError>;

    async fn invite_member(
        &self,
        workspace_id: WorkspaceId,
        invitee_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError>;

    async fn get_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError>;

    /// Returns the created reminder when the server echoes it back.
    async fn add_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError>;

    /// `time` is the already-normalized value to transmit.
    async fn update_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        time: NaiveDateTime,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError>;

    async fn remove_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError>;

    async fn create_card(
        &self,
        workspace_id: WorkspaceId,
        draft: &CardDraft,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError>;

    async fn update_card(
        &self,
        card_id: CardId,
        workspace_id: WorkspaceId,
        patch: &CardPatch,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError>;
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

/// Longest `Retry-After` we honor.
const MAX_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retryable,
    NonRetryable,
}

/// How one attempt ended, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Status(StatusCode),
    /// The connection was never established.
    Unsent,
    /// The request may have reached the server.
    Lost,
}

/// Creates (invites, reminder adds, cards) are `POST`s and are only resent
/// when the server cannot have acted on them. Reads, updates and deletes are
/// resent on any transient failure.
fn retry_decision(method: &Method, attempt: Attempt) -> RetryDecision {
    let replayable = *method != Method::POST;
    let retry = match attempt {
        Attempt::Unsent => true,
        Attempt::Lost => replayable,
        Attempt::Status(StatusCode::TOO_MANY_REQUESTS) => true,
        Attempt::Status(status) => {
            replayable && (status == StatusCode::REQUEST_TIMEOUT || status.is_server_error())
        }
    };
    if retry {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

/// `Retry-After` seconds when the server sent them, else doubling backoff from
/// `initial_backoff_ms`, capped at `max_backoff_ms`.
fn retry_delay(attempt: u32, policy: &RetryPolicy, retry_after: Option<&str>) -> Duration {
    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok()) {
        return Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS));
    }
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(
        policy
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(policy.max_backoff_ms),
    )
}

/// Executes `request`, resending it per `retry_decision` until `policy` runs out.
pub async fn send_with_retry(
    client: &reqwest::Client,
    request: Request,
    policy: &RetryPolicy,
) -> Result<Response, ApiError> {
    let attempts = policy.max_attempts.max(1);
    let method = request.method().clone();
    let url = request.url().path().to_string();
    let mut pending = Some(request);
    let mut attempt = 1;

    loop {
        let Some(current) = pending.take() else {
            return Err(ApiError::Status {
                status: 0,
                message: "request exhausted retries".to_string(),
            });
        };
        // Streaming bodies cannot be cloned; they get exactly one attempt.
        let next = if attempt < attempts { current.try_clone() } else { None };

        let (outcome, retry_after, result) = match client.execute(current).await {
            Ok(response) => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                (Attempt::Status(response.status()), retry_after, Ok(response))
            }
            Err(err) => {
                let outcome = if err.is_connect() { Attempt::Unsent } else { Attempt::Lost };
                (outcome, None, Err(ApiError::Http(err)))
            }
        };

        let retryable = match outcome {
            Attempt::Status(status) if status.is_success() => false,
            _ => retry_decision(&method, outcome) == RetryDecision::Retryable,
        };
        if !retryable || next.is_none() {
            return result;
        }

        let delay = retry_delay(attempt, policy, retry_after.as_deref());
        log::warn!(
            "api: {} {} attempt {}/{} failed ({:?}), retrying in {:?}",
            method,
            url,
            attempt,
            attempts,
            outcome,
            delay
        );
        tokio::time::sleep(delay).await;
        pending = next;
        attempt += 1;
    }
}

// ============================================================================
// HTTP backend
// ============================================================================

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: url::Url,
    access_token: String,
    retry: RetryPolicy,
}

impl HttpBackend {
    pub fn new(config: &Config, access_token: &str) -> Result<Self, ApiError> {
        // Trailing slash so relative joins keep the version prefix.
        let mut base = config.api_base_url.trim_end_matches('/').to_string();
        base.push('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: url::Url::parse(&base)?,
            access_token: access_token.to_string(),
            retry: config.retry.to_policy(),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<url::Url, ApiError> {
        let mut url = self.base_url.join(path.trim_start_matches('/'))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Builds an authenticated request, scoped to a workspace when `scope` is given.
    fn request(
        &self,
        method: Method,
        url: url::Url,
        scope: Option<(WorkspaceId, &LinkedEmail)>,
    ) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/json");
        if let Some((workspace_id, acting)) = scope {
            builder = builder
                .header(USER_EMAIL_HEADER, acting.as_str())
                .header(WORKSPACE_ID_HEADER, workspace_id.to_string());
        }
        builder
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = request.build()?;
        let response = send_with_retry(&self.client, request, &self.retry).await?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        message: error_message(&text),
    })
}

/// Pulls `message` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl DeckBackend for HttpBackend {
    async fn list_workspaces(&self, email: &LinkedEmail) -> Result<Vec<Workspace>, ApiError> {
        self.fetch_workspaces(email).await
    }

    async fn delete_workspace(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.delete_workspace_request(workspace_id, acting).await
    }

    async fn list_members(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Vec<Member>, ApiError> {
        self.fetch_members(workspace_id, acting).await
    }

    async fn current_user_info(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Member, ApiError> {
        self.fetch_current_user_info(workspace_id, acting).await
    }

    async fn verify_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.put_invitation_verdict(members::VERIFY_PATH, workspace_id, member_email, acting)
            .await
    }

    async fn disprove_invitation(
        &self,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.put_invitation_verdict(members::DISPROVE_PATH, workspace_id, member_email, acting)
            .await
    }

    async fn invite_member(
        &self,
        workspace_id: WorkspaceId,
        invitee_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.post_invite(workspace_id, invitee_email, acting).await
    }

    async fn get_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError> {
        self.fetch_personal_reminder(schedule_id, workspace_id, acting)
            .await
    }

    async fn add_personal_reminder(
        &self,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Option<PersonalReminder>, ApiError> {
        self.post_personal_reminder(schedule_id, workspace_id, acting)
            .await
    }

    async fn update_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        time: NaiveDateTime,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.put_personal_reminder(reminder_id, schedule_id, time, workspace_id, acting)
            .await
    }

    async fn remove_personal_reminder(
        &self,
        reminder_id: ReminderId,
        schedule_id: ScheduleId,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        self.delete_personal_reminder(reminder_id, schedule_id, workspace_id, acting)
            .await
    }

    async fn create_card(
        &self,
        workspace_id: WorkspaceId,
        draft: &CardDraft,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError> {
        self.post_card(workspace_id, draft, acting).await
    }

    async fn update_card(
        &self,
        card_id: CardId,
        workspace_id: WorkspaceId,
        patch: &CardPatch,
        acting: &LinkedEmail,
    ) -> Result<Card, ApiError> {
        self.put_card(card_id, workspace_id, patch, acting).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        let config = Config {
            api_base_url: base.to_string(),
            ..Config::default()
        };
        HttpBackend::new(&config, "token").unwrap()
    }

    #[test]
    fn test_reads_retry_on_transient_status() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::BAD_GATEWAY, StatusCode::REQUEST_TIMEOUT] {
            assert_eq!(
                retry_decision(&Method::GET, Attempt::Status(status)),
                RetryDecision::Retryable
            );
        }
        assert_eq!(
            retry_decision(&Method::PUT, Attempt::Lost),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision(&Method::GET, Attempt::Status(StatusCode::FORBIDDEN)),
            RetryDecision::NonRetryable
        );
    }

    #[test]
    fn test_creates_are_not_replayed_after_reaching_server() {
        assert_eq!(
            retry_decision(&Method::POST, Attempt::Status(StatusCode::BAD_GATEWAY)),
            RetryDecision::NonRetryable
        );
        assert_eq!(
            retry_decision(&Method::POST, Attempt::Lost),
            RetryDecision::NonRetryable
        );
        assert_eq!(
            retry_decision(&Method::POST, Attempt::Unsent),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision(&Method::POST, Attempt::Status(StatusCode::TOO_MANY_REQUESTS)),
            RetryDecision::Retryable
        );
    }

    #[test]
    fn test_retry_delay_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(1, &policy, None), Duration::from_millis(250));
        assert_eq!(retry_delay(2, &policy, None), Duration::from_millis(500));
        assert_eq!(retry_delay(10, &policy, None), Duration::from_millis(policy.max_backoff_ms));
        assert_eq!(retry_delay(u32::MAX, &policy, None), Duration::from_millis(policy.max_backoff_ms));
    }

    #[test]
    fn test_retry_after_header_wins() {
        let policy = RetryPolicy::default();
        assert_eq!(retry_delay(1, &policy, Some("4")), Duration::from_secs(4));
        assert_eq!(retry_delay(1, &policy, Some("600")), Duration::from_secs(30));
        assert_eq!(retry_delay(1, &policy, Some("soon")), Duration::from_millis(250));
    }

    #[test]
    fn test_endpoint_keeps_version_prefix() {
        let api = backend("https://boards.example.com/api/v1");
        let url = api
            .endpoint("/workspace", &[("email", "a+b@x.io".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://boards.example.com/api/v1/workspace?email=a%2Bb%40x.io"
        );
    }

    #[test]
    fn test_error_message_prefers_json_message() {
        assert_eq!(error_message(r#"{"message":"not owner"}"#), "not owner");
        assert_eq!(error_message("plain failure\n"), "plain failure");
    }
}
