//! Control-plane authentication (§6.1, §6.4): the identity provider is an
//! external collaborator that has already verified the caller and handed
//! this process a stable `user_id`/`org_id` pair, the same trust boundary
//! the teacher's own `auth_middleware` sits at — only the token format
//! differs, since here the token is minted and checked upstream.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::OrchestratorError;

/// The authenticated caller of a control-plane operation (§6.1 "Each
/// operation authenticates via an opaque `user_id` and optional `org_id`").
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub org_id: Option<String>,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = OrchestratorError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, "x-user-id")
            .or_else(|| query_param(parts, "user_id"))
            .ok_or_else(|| OrchestratorError::Unauthorized("missing caller identity".to_string()))?;

        let org_id = header_value(parts, "x-org-id").or_else(|| query_param(parts, "org_id"));

        Ok(Principal { user_id, org_id })
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Query-param fallback, same reason the teacher's token extraction falls
/// back to a query parameter: `EventSource` cannot set custom headers, so
/// the activity stream endpoint must accept identity this way too.
fn query_param(parts: &Parts, key: &str) -> Option<String> {
    let query = parts.uri.query()?;
    query.split('&').find_map(|pair| {
        let mut halves = pair.splitn(2, '=');
        let k = halves.next()?;
        let v = halves.next()?;
        (k == key).then(|| v.to_string())
    })
}

/// Checks `project.createdBy == user_id`, or org-membership when the
/// project and caller share a non-empty `org_id` (§6.1 authorization rule).
pub fn authorize_project(project: &crate::db::Project, principal: &Principal) -> Result<(), OrchestratorError> {
    if project.creator_id == principal.user_id {
        return Ok(());
    }

    if let (Some(project_org), Some(caller_org)) = (&project.org_id, &principal.org_id) {
        if project_org == caller_org {
            return Ok(());
        }
    }

    Err(OrchestratorError::Forbidden(
        "caller is not authorized for this project".to_string(),
    ))
}

/// Loads the project and authorizes the caller in one step, the shape
/// every handler below needs before touching the engine layer.
pub async fn load_authorized_project(
    db: &crate::DbPool,
    project_id: &str,
    principal: &Principal,
) -> Result<crate::db::Project, OrchestratorError> {
    let project = crate::db::find_project(db, project_id)
        .await
        .map_err(OrchestratorError::from)?
        .ok_or_else(|| OrchestratorError::NotFound("project not found".to_string()))?;

    authorize_project(&project, principal)?;
    Ok(project)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Project;

    fn project(creator: &str, org: Option<&str>) -> Project {
        Project {
            id: "7".to_string(),
            org_id: org.map(|s| s.to_string()),
            creator_id: creator.to_string(),
            repo_owner: None,
            repo_name: None,
            default_branch: "main".to_string(),
            archived: false,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn owner_is_authorized() {
        let p = project("u1", None);
        let principal = Principal { user_id: "u1".to_string(), org_id: None };
        assert!(authorize_project(&p, &principal).is_ok());
    }

    #[test]
    fn shared_org_is_authorized() {
        let p = project("u1", Some("org-a"));
        let principal = Principal { user_id: "u2".to_string(), org_id: Some("org-a".to_string()) };
        assert!(authorize_project(&p, &principal).is_ok());
    }

    #[test]
    fn unrelated_caller_is_forbidden() {
        let p = project("u1", Some("org-a"));
        let principal = Principal { user_id: "u2".to_string(), org_id: Some("org-b".to_string()) };
        assert!(authorize_project(&p, &principal).is_err());
    }
}
