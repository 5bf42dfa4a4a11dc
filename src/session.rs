//! Session Manager (C7): tracks `ChatSession` records and exposes the
//! higher-level workspace/pull/commit/revert operations the control plane
//! calls, thin wrappers around the Git Operator (C4) and remote
//! introspection that additionally keep `last_activity_at`/`message_count`
//! current.

use anyhow::{Context, Result};
use rand::Rng as _;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{branch_name, OrchestratorConfig};
use crate::db::{self, ChatSession, DbPool};
use crate::git;
use crate::github::GitHubClient;

pub struct SessionManager {
    config: Arc<OrchestratorConfig>,
    db: DbPool,
}

/// §4.7 `pull_session_branch` result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PullOutcome {
    pub changed: bool,
    pub commits_pulled: u32,
    pub previous_commit: String,
    pub new_commit: String,
    pub branch_name: String,
    pub message: String,
    pub container_restarted: bool,
}

impl SessionManager {
    pub fn new(config: Arc<OrchestratorConfig>, db: DbPool) -> Self {
        Self { config, db }
    }

    pub fn project_path(&self, project_id: &str) -> PathBuf {
        PathBuf::from(&self.config.projects_base_path).join(project_id)
    }

    pub fn session_branch_name(&self, session_id: &str) -> String {
        branch_name(&self.config.session_branch_prefix, session_id)
    }

    /// Generates a fresh session id: `"kosuke-chat-" + 6 random lowercase
    /// alphanumerics`, per §3's `session_id = "kosuke-chat-" + random6`.
    pub fn generate_session_id() -> String {
        const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut rng = rand::rng();
        let suffix: String = (0..6)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        format!("kosuke-chat-{suffix}")
    }

    /// §4.7 `create_session`: persists a new `ChatSession` with a freshly
    /// generated `session_id` and its derived branch name.
    pub async fn create_session(&self, project_id: &str, user_id: &str) -> Result<ChatSession> {
        let session_id = Self::generate_session_id();
        let branch = self.session_branch_name(&session_id);
        db::get_or_create_chat_session(&self.db, project_id, &session_id, user_id, &branch).await
    }

    /// §4.7 `ensure_session_workspace`: clones the project if its working
    /// tree is absent, then checks out (or creates) the session branch.
    /// Recovered locally per §7: absent branch is created from HEAD.
    pub async fn ensure_session_workspace(
        &self,
        project_id: &str,
        session_id: &str,
        user_id: &str,
        repo_url: &str,
        token: &str,
    ) -> Result<PathBuf> {
        let project_path = self.project_path(project_id);

        if !project_path.exists() {
            git::clone(repo_url, &self.config.projects_base_path, project_id, token).await?;
        }

        let branch = self.session_branch_name(session_id);
        git::checkout_session_branch(&project_path, &branch).await?;

        db::get_or_create_chat_session(&self.db, project_id, session_id, user_id, &branch).await?;

        Ok(project_path)
    }

    /// §4.7 `list_sessions`: ordered by `last_activity_at` descending,
    /// refreshing merge state for sessions that haven't been checked yet.
    /// Merge-check failures are logged and never fail the list (§7).
    pub async fn list_sessions(
        &self,
        project_id: &str,
        github: Option<&GitHubClient>,
        repo_owner: Option<&str>,
        repo_name: Option<&str>,
    ) -> Result<Vec<ChatSession>> {
        let mut sessions = db::list_chat_sessions(&self.db, project_id).await?;

        if let (Some(client), Some(owner), Some(repo)) = (github, repo_owner, repo_name) {
            for session in sessions.iter_mut() {
                if !session.needs_merge_refresh() {
                    continue;
                }
                if let Err(err) = self.refresh_merge_state(client, owner, repo, session).await {
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %err,
                        "merge-state refresh failed; keeping previous state"
                    );
                }
            }
        }

        Ok(sessions)
    }

    async fn refresh_merge_state(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        session: &mut ChatSession,
    ) -> Result<()> {
        let pulls = client
            .list_pulls_by_head(owner, repo, owner, &session.branch_name)
            .await
            .context("failed to list pull requests by head")?;

        let merged = pulls.into_iter().find(|pr| pr.merged_at.is_some());
        if let Some(pr) = merged {
            let merged_at = pr.merged_at.clone().unwrap();
            db::record_merge_state(&self.db, &session.id, &merged_at, &pr.html_url).await?;
            session.merged_at = Some(merged_at);
            session.merge_url = Some(pr.html_url);
        }

        Ok(())
    }

    /// §4.7 `pull_session_branch`. The caller passes an optional
    /// `on_commits_pulled` hook which is only invoked when at least one
    /// commit was pulled; the hook is expected to restart the preview
    /// container for this `(project_id, session_id)` if one exists, and
    /// report whether it did.
    pub async fn pull_session_branch<F, Fut>(
        &self,
        project_id: &str,
        session_id: &str,
        on_commits_pulled: F,
    ) -> Result<PullOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<bool>>,
    {
        let project_path = self.project_path(project_id);
        let branch = self.session_branch_name(session_id);

        let result = git::pull_fast_forward(&project_path, &branch).await?;

        let container_restarted = if result.commits_pulled > 0 {
            on_commits_pulled().await.unwrap_or_else(|err| {
                tracing::warn!(project_id, session_id, error = %err, "preview restart after pull failed");
                false
            })
        } else {
            false
        };

        if let Some(session) = db::find_chat_session(&self.db, project_id, session_id).await? {
            db::bump_activity(&self.db, &session.id, false).await?;
        }

        Ok(PullOutcome {
            changed: result.changed,
            commits_pulled: result.commits_pulled,
            previous_commit: result.previous_commit,
            new_commit: result.new_commit,
            branch_name: result.branch_name,
            message: result.message,
            container_restarted,
        })
    }

    /// §4.7 `commit_session_changes`: wraps C4's commit, additionally
    /// bumping `last_activity_at`/`message_count` on success.
    pub async fn commit_session_changes(
        &self,
        project_id: &str,
        session_id: &str,
        message: Option<String>,
        remote_url: &str,
        token: &str,
    ) -> Result<Option<git::Commit>> {
        let project_path = self.project_path(project_id);
        let branch = self.session_branch_name(session_id);

        let commit = git::commit_session_changes(git::CommitRequest {
            session_path: &project_path,
            session_id,
            message,
            token,
            remote_url,
            branch_name: &branch,
        })
        .await?;

        if commit.is_some() {
            if let Some(session) = db::find_chat_session(&self.db, project_id, session_id).await? {
                db::bump_activity(&self.db, &session.id, true).await?;
            }
        }

        Ok(commit)
    }

    /// §4.7 `revert_to_commit`: wraps C4's hard-reset-and-force-push,
    /// bumping `last_activity_at` on success.
    pub async fn revert_to_commit(
        &self,
        project_id: &str,
        session_id: &str,
        sha: &str,
        remote_url: &str,
        token: &str,
    ) -> Result<bool> {
        let project_path = self.project_path(project_id);
        let branch = self.session_branch_name(session_id);

        let success = git::revert_to_commit(&project_path, sha, remote_url, token, &branch).await?;

        if success {
            if let Some(session) = db::find_chat_session(&self.db, project_id, session_id).await? {
                db::bump_activity(&self.db, &session.id, false).await?;
            }
        }

        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_match_the_expected_shape() {
        let id = SessionManager::generate_session_id();
        assert!(id.starts_with("kosuke-chat-"));
        assert_eq!(id.len(), "kosuke-chat-".len() + 6);
    }

    #[test]
    fn session_ids_are_not_trivially_repeated() {
        let a = SessionManager::generate_session_id();
        let b = SessionManager::generate_session_id();
        // Not a strict guarantee, but collisions across two draws from a
        // 36^6 space should never happen in a test run.
        assert_ne!(a, b);
    }
}
