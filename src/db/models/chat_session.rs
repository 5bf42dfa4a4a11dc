//! ChatSession model (§3): a conversation thread bound to its own Git
//! branch and preview environment, created lazily on first preview/commit.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSessionStatus {
    Active,
    Archived,
}

impl ChatSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub session_id: String,
    pub branch_name: String,
    pub status: String,
    pub message_count: i64,
    pub last_activity_at: String,
    pub is_default: bool,
    pub merged_at: Option<String>,
    pub merge_url: Option<String>,
    pub created_at: String,
}

impl ChatSession {
    /// A session has had no merge-state refresh yet iff it carries a branch
    /// but no recorded merge timestamp — the condition §4.7's
    /// `list_sessions` uses to decide whether to probe the remote again.
    pub fn needs_merge_refresh(&self) -> bool {
        !self.branch_name.is_empty() && self.merged_at.is_none()
    }
}
