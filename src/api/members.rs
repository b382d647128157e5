//! Member listing, caller info, invitation verdicts and invites.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{ApiError, HttpBackend};
use crate::types::{LinkedEmail, Member, WorkspaceId};

pub(super) const VERIFY_PATH: &str = "workspace_user/verify-invitation";
pub(super) const DISPROVE_PATH: &str = "workspace_user/disprove-invitation";

/// Body shared by verify/disprove. The server names the workspace id field
/// `schedule_id`.
#[derive(Debug, Serialize)]
struct InvitationVerdictBody<'a> {
    email: &'a str,
    schedule_id: WorkspaceId,
}

#[derive(Debug, Serialize)]
struct InviteBody<'a> {
    email: &'a str,
    workspace_id: WorkspaceId,
}

/// The members endpoint answers with either a bare array or `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MemberListBody {
    Bare(Vec<Member>),
    Wrapped {
        #[serde(default)]
        data: Vec<Member>,
    },
}

impl MemberListBody {
    fn into_members(self) -> Vec<Member> {
        match self {
            MemberListBody::Bare(members) => members,
            MemberListBody::Wrapped { data } => data,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MemberBody {
    Bare(Member),
    Wrapped { data: Member },
}

fn scope_query(workspace_id: WorkspaceId, acting: &LinkedEmail) -> [(&'static str, String); 2] {
    [
        ("organizationId", workspace_id.to_string()),
        ("userEmail", acting.to_string()),
    ]
}

impl HttpBackend {
    /// `GET /workspace_user/members?organizationId=&userEmail=`
    pub(super) async fn fetch_members(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Vec<Member>, ApiError> {
        let url = self.endpoint("workspace_user/members", &scope_query(workspace_id, acting))?;
        let request = self.request(Method::GET, url, Some((workspace_id, acting)));
        let body: MemberListBody = self.send_json(request).await?;
        Ok(body.into_members())
    }

    /// `GET /workspace_user/current-user-info?organizationId=&userEmail=`
    pub(super) async fn fetch_current_user_info(
        &self,
        workspace_id: WorkspaceId,
        acting: &LinkedEmail,
    ) -> Result<Member, ApiError> {
        let url = self.endpoint(
            "workspace_user/current-user-info",
            &scope_query(workspace_id, acting),
        )?;
        let request = self.request(Method::GET, url, Some((workspace_id, acting)));
        let body: MemberBody = self.send_json(request).await?;
        Ok(match body {
            MemberBody::Bare(member) => member,
            MemberBody::Wrapped { data } => data,
        })
    }

    /// `PUT` to the verify or disprove endpoint.
    pub(super) async fn put_invitation_verdict(
        &self,
        path: &str,
        workspace_id: WorkspaceId,
        member_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(path, &[])?;
        let request = self
            .request(Method::PUT, url, Some((workspace_id, acting)))
            .json(&InvitationVerdictBody {
                email: member_email,
                schedule_id: workspace_id,
            });
        self.send(request).await?;
        Ok(())
    }

    /// `POST /workspace_user/invite`
    pub(super) async fn post_invite(
        &self,
        workspace_id: WorkspaceId,
        invitee_email: &str,
        acting: &LinkedEmail,
    ) -> Result<(), ApiError> {
        let url = self.endpoint("workspace_user/invite", &[])?;
        let request = self
            .request(Method::POST, url, Some((workspace_id, acting)))
            .json(&InviteBody {
                email: invitee_email,
                workspace_id,
            });
        self.send(request).await?;
        Ok(())
    }
}
