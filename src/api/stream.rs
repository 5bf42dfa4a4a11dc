//! `StreamActivity` (§6.1, §6.2): the SSE endpoint, grounded the same way
//! the teacher exposes its own log-tailing endpoint — an `axum::response::Sse`
//! wrapping an `async_stream` generator, with a standing `KeepAlive`.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

use crate::activity;
use crate::api::auth::{load_authorized_project, Principal};
use crate::error::OrchestratorError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamActivityQuery {
    #[serde(default)]
    pub last_message_id: i64,
}

pub async fn stream_activity(
    State(state): State<Arc<AppState>>,
    Path((project_id, session_id)): Path<(String, String)>,
    Query(query): Query<StreamActivityQuery>,
    principal: Principal,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, OrchestratorError> {
    load_authorized_project(&state.db, &project_id, &principal).await?;

    // session_id is accepted for symmetry with the rest of §6.1 but the
    // poll itself is scoped by project_id, matching `db::poll_messages`.
    let _ = session_id;

    let stream = activity::activity_stream(state.db.clone(), project_id, query.last_message_id);
    Ok(Sse::new(stream).keep_alive(activity::keep_alive()))
}
