//! `ExecuteQuery` (§6.1): read-only SQL access to a session's provisioned
//! database. The non-SELECT rejection (§8 property 5) happens inside
//! `DbProvisioner::execute_query` itself, before any connection is
//! acquired; this handler only translates the result.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::auth::{load_authorized_project, Principal};
use crate::config::db_name;
use crate::dbprovisioner::QueryResult;
use crate::error::OrchestratorError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: String,
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Path((project_id, session_id)): Path<(String, String)>,
    principal: Principal,
    Json(body): Json<ExecuteQueryRequest>,
) -> Result<Json<QueryResult>, OrchestratorError> {
    load_authorized_project(&state.db, &project_id, &principal).await?;

    let db = db_name(&project_id, &session_id).map_err(|err| OrchestratorError::BadRequest(err.to_string()))?;

    let result = state
        .db_provisioner
        .execute_query(&db, &body.query)
        .await
        .map_err(|err| {
            let message = err.to_string();
            if message.to_lowercase().contains("only select") || message.to_lowercase().contains("read-only") {
                OrchestratorError::InvalidQuery(message)
            } else {
                OrchestratorError::internal(message)
            }
        })?;

    Ok(Json(result))
}
