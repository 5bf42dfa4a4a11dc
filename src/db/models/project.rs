//! Project model (§3): the Git-backed codebase a chat session's preview is
//! rendered from.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    pub org_id: Option<String>,
    pub creator_id: String,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    pub default_branch: String,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}
