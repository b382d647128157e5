//! Acting-identity resolution.
//!
//! Every workspace-scoped mutation runs under the linked email whose fetch
//! returned that workspace. When no email's list contains the id (snapshot
//! not loaded yet, or no access) resolution fails instead of guessing.

use crate::error::DeckError;
use crate::snapshot::AggregationSnapshot;
use crate::types::{LinkedEmail, WorkspaceId};

/// Returns the linked email that owns `workspace_id` in `snapshot`.
///
/// If the workspace is visible under several emails (an ownership anomaly the
/// snapshot already reports), the first email in registry order wins and the
/// conflict is logged again here so the acting choice is traceable.
pub fn resolve_owner(
    workspace_id: WorkspaceId,
    snapshot: &AggregationSnapshot,
) -> Result<LinkedEmail, DeckError> {
    let Some((owner, _)) = snapshot.locate(workspace_id) else {
        log::debug!(
            "Owner: workspace {} not present in snapshot generation {}",
            workspace_id,
            snapshot.generation()
        );
        return Err(DeckError::OwnerUnresolved(workspace_id));
    };

    if let Some(anomaly) = snapshot.anomaly_for(workspace_id) {
        log::warn!(
            "Owner: workspace {} visible under {} emails, acting as {}",
            workspace_id,
            anomaly.emails.len(),
            owner
        );
    }

    Ok(owner.clone())
}
