//! Preview control endpoints (§6.1): `GetPreviewStatus`, `StartPreview`,
//! `StopPreview`. Thin handlers — all the real work lives in the Preview
//! Service (C6); these just authorize, extract, and translate.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::auth::{load_authorized_project, Principal};
use crate::engine::PreviewStatus;
use crate::error::OrchestratorError;
use crate::AppState;

pub async fn get_preview_status(
    State(state): State<Arc<AppState>>,
    Path((project_id, session_id)): Path<(String, String)>,
    principal: Principal,
) -> Result<Json<PreviewStatus>, OrchestratorError> {
    load_authorized_project(&state.db, &project_id, &principal).await?;

    let status = state
        .previews
        .get_preview_status(&project_id, &session_id)
        .await
        .map_err(OrchestratorError::from)?;

    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct StartPreviewRequest {
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

pub async fn start_preview(
    State(state): State<Arc<AppState>>,
    Path((project_id, session_id)): Path<(String, String)>,
    principal: Principal,
    Json(body): Json<StartPreviewRequest>,
) -> Result<Json<PreviewStatus>, OrchestratorError> {
    load_authorized_project(&state.db, &project_id, &principal).await?;

    let workspace_path = state.sessions.project_path(&project_id);

    let status = state
        .previews
        .start_preview(&project_id, &session_id, body.env_vars, &workspace_path)
        .await
        .map_err(|err| OrchestratorError::EngineUnavailable(err.to_string()))?;

    Ok(Json(status))
}

#[derive(Debug, serde::Serialize)]
pub struct StopPreviewResponse {
    pub success: bool,
}

pub async fn stop_preview(
    State(state): State<Arc<AppState>>,
    Path((project_id, session_id)): Path<(String, String)>,
    principal: Principal,
) -> Result<Json<StopPreviewResponse>, OrchestratorError> {
    load_authorized_project(&state.db, &project_id, &principal).await?;

    state
        .previews
        .stop_preview(&project_id, &session_id)
        .await
        .map_err(OrchestratorError::from)?;

    Ok(Json(StopPreviewResponse { success: true }))
}
