//! Control-plane persistence: `Project`, `ChatSession`, and `Message` (§3,
//! §6.3), stored in an embedded SQLite database. Per-session Postgres
//! databases are a distinct resource class owned by `crate::dbprovisioner`
//! and are not migrated here.

pub mod models;

pub use models::{ChatSession, ChatSessionStatus, Message, MessageRole, Project, FILE_OP_MARKER};

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

pub type DbPool = SqlitePool;

/// Execute a migration file one statement at a time, stripping `--` comment
/// lines first, the same helper the teacher's own migrations use.
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let db_path = data_dir.join("orchestrator.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    tracing::info!(path = %db_path.display(), "opening control-plane database");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .with_context(|| format!("failed to open control-plane database at {}", db_path.display()))?;

    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    run_migrations(&pool).await?;

    tracing::info!("control-plane database ready");
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("running control-plane migrations");

    let has_projects_table: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name='projects'")
            .fetch_optional(pool)
            .await?;
    if has_projects_table.is_none() {
        execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;
    }

    Ok(())
}

/// Fetch (or lazily create) the default chat session for a project, per
/// §4.7 `ensure_session_workspace`'s "record `ChatSession` if absent" step.
pub async fn get_or_create_chat_session(
    pool: &DbPool,
    project_id: &str,
    session_id: &str,
    user_id: &str,
    branch_name: &str,
) -> Result<ChatSession> {
    if let Some(existing) = sqlx::query_as::<_, ChatSession>(
        "SELECT * FROM chat_sessions WHERE project_id = ? AND session_id = ?",
    )
    .bind(project_id)
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    {
        return Ok(existing);
    }

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO chat_sessions (id, project_id, user_id, session_id, branch_name, status, message_count, is_default) \
         VALUES (?, ?, ?, ?, ?, 'active', 0, 0)",
    )
    .bind(&id)
    .bind(project_id)
    .bind(user_id)
    .bind(session_id)
    .bind(branch_name)
    .execute(pool)
    .await
    .context("failed to create chat session record")?;

    sqlx::query_as::<_, ChatSession>("SELECT * FROM chat_sessions WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .context("failed to reload just-created chat session")
}

pub async fn find_chat_session(pool: &DbPool, project_id: &str, session_id: &str) -> Result<Option<ChatSession>> {
    sqlx::query_as::<_, ChatSession>(
        "SELECT * FROM chat_sessions WHERE project_id = ? AND session_id = ?",
    )
    .bind(project_id)
    .bind(session_id)
    .fetch_optional(pool)
    .await
    .context("failed to look up chat session")
}

pub async fn list_chat_sessions(pool: &DbPool, project_id: &str) -> Result<Vec<ChatSession>> {
    sqlx::query_as::<_, ChatSession>(
        "SELECT * FROM chat_sessions WHERE project_id = ? ORDER BY last_activity_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list chat sessions")
}

pub async fn record_merge_state(pool: &DbPool, chat_session_id: &str, merged_at: &str, merge_url: &str) -> Result<()> {
    sqlx::query("UPDATE chat_sessions SET merged_at = ?, merge_url = ? WHERE id = ?")
        .bind(merged_at)
        .bind(merge_url)
        .bind(chat_session_id)
        .execute(pool)
        .await
        .context("failed to record merge state")?;
    Ok(())
}

pub async fn bump_activity(pool: &DbPool, chat_session_id: &str, increment_message_count: bool) -> Result<()> {
    if increment_message_count {
        sqlx::query(
            "UPDATE chat_sessions SET last_activity_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), message_count = message_count + 1 WHERE id = ?",
        )
        .bind(chat_session_id)
        .execute(pool)
        .await?;
    } else {
        sqlx::query("UPDATE chat_sessions SET last_activity_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?")
            .bind(chat_session_id)
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Messages for a project with `id > after_id`, newest first, capped at
/// `limit` — the Activity Stream's (C8) poll query.
pub async fn poll_messages(pool: &DbPool, project_id: &str, after_id: i64, limit: i64) -> Result<Vec<Message>> {
    sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE project_id = ? AND id > ? ORDER BY id DESC LIMIT ?",
    )
    .bind(project_id)
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to poll messages")
}

/// Aggregate token usage across every message of a project, for the
/// batch-leading `TokenUpdate` frame (§4.8).
pub async fn aggregate_tokens(pool: &DbPool, project_id: &str) -> Result<(i64, i64, Option<i64>)> {
    let row: (Option<i64>, Option<i64>) = sqlx::query_as(
        "SELECT COALESCE(SUM(tokens_input), 0), COALESCE(SUM(tokens_output), 0) FROM messages WHERE project_id = ?",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    let newest_context: Option<i64> = sqlx::query_scalar(
        "SELECT context_tokens FROM messages WHERE project_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .flatten();

    Ok((row.0.unwrap_or(0), row.1.unwrap_or(0), newest_context))
}

pub async fn find_project(pool: &DbPool, project_id: &str) -> Result<Option<Project>> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .context("failed to look up project")
}
