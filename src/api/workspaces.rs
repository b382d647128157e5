//! Workspace listing and deletion.

use reqwest::Method;

use super::{ApiError, HttpBackend};
use crate::types::{LinkedEmail, Workspace, WorkspaceId};

impl HttpBackend {
    /// `GET /workspace?email=`: every workspace visible to one linked email.
    pub(super) async fn fetch_workspaces(
        &self,
        email: &LinkedEmail,
    ) -> Result<Vec<Workspace>, ApiError> {
        let url = self.endpoint("workspace", &[("email", email.to_string())])?;
        let request = self
            .request(Method::GET, url, None)
            .header(super::USER_EMAIL_HEADER, email.as_str());
        self.send_json(request).await
    }

    /// `DELETE /workspace/delete-workspace`: target and actor travel in headers only.
    pub(super) async fn delete_workspace_request(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        let url = self.endpoint("workspace/delete-workspace", &[])?;
        let request = self.request(Method::DELETE, url, Some((workspace_id, acting)));
        self.send(request).await?;
        Ok(())
    }
}
