//! Error types for dashboard operations
//!
//! Errors are classified by how the caller should react:
//! - Silent: owner not resolvable yet, cancelled fetches (data still loading)
//! - Retryable: network issues, non-2xx responses
//! - Terminal: role gate failures, invalid transitions, validation failures

use thiserror::Error;

use crate::api::ApiError;
use crate::types::{MemberStatus, WorkspaceId};

/// Error type for the aggregation, membership and reminder layers.
#[derive(Debug, Error)]
pub enum DeckError {
    // Recoverable: retry after the next snapshot
    #[error("No linked email owns workspace {0}")]
    OwnerUnresolved(WorkspaceId),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch cancelled")]
    Cancelled,

    // Retryable
    #[error("Network failure: {0}")]
    NetworkFailure(String),

    // Terminal for this attempt
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Cannot {action} a member whose status is {from}")]
    InvalidTransition {
        from: MemberStatus,
        action: &'static str,
    },

    #[error("A mutation for {0} is already in flight")]
    MutationPending(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeckError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeckError::NetworkFailure(_) | DeckError::OwnerUnresolved(_) | DeckError::NotFound(_)
        )
    }

    /// Returns true if the attempted action should no-op without a notice.
    ///
    /// An unresolved owner almost always means the snapshot has not finished
    /// loading; a cancelled fetch belongs to a view the user already left.
    pub fn is_silent(&self) -> bool {
        matches!(self, DeckError::OwnerUnresolved(_) | DeckError::Cancelled)
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            DeckError::OwnerUnresolved(_) => "Workspaces are still loading. Try again shortly.",
            DeckError::NotFound(_) => "Refresh the page; the item may have been removed.",
            DeckError::Cancelled => "",
            DeckError::NetworkFailure(_) => "Check your connection and try again.",
            DeckError::Forbidden(_) => "Ask a workspace owner or admin to do this.",
            DeckError::ValidationFailure(_) => "Correct the highlighted value and retry.",
            DeckError::InvalidTransition { .. } => "Refresh the member list to see the latest status.",
            DeckError::MutationPending(_) => "Wait for the previous request to finish.",
            DeckError::Config(_) => "Check your configuration in ~/.workdeck/config.json",
        }
    }

    /// Notice to surface to the user, or `None` when the failure is silent.
    pub fn notice(&self) -> Option<ErrorNotice> {
        if self.is_silent() {
            None
        } else {
            Some(ErrorNotice::from(self))
        }
    }
}

impl From<ApiError> for DeckError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => DeckError::Forbidden("session rejected by server".to_string()),
            ApiError::Status { status: 403, message } => DeckError::Forbidden(message),
            ApiError::Status { status: 404, message } => DeckError::NotFound(message),
            other => DeckError::NetworkFailure(other.to_string()),
        }
    }
}

/// Serializable error representation for the notification layer
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub message: String,
    pub kind: ErrorKind,
    pub can_retry: bool,
    pub suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    NetworkFailure,
    ValidationFailure,
}

impl From<&DeckError> for ErrorNotice {
    fn from(err: &DeckError) -> Self {
        let kind = match err {
            DeckError::OwnerUnresolved(_) | DeckError::NotFound(_) | DeckError::Cancelled => {
                ErrorKind::NotFound
            }
            DeckError::Forbidden(_) => ErrorKind::Forbidden,
            DeckError::NetworkFailure(_) => ErrorKind::NetworkFailure,
            DeckError::ValidationFailure(_)
            | DeckError::InvalidTransition { .. }
            | DeckError::MutationPending(_)
            | DeckError::Config(_) => ErrorKind::ValidationFailure,
        };

        ErrorNotice {
            message: err.to_string(),
            kind,
            can_retry: err.is_retryable(),
            suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
