pub mod auth;
mod previews;
mod query;
mod sessions;
mod stream;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Builds the full control-plane router (§6.1), the same shape as the
/// teacher's own `create_router`: a `/health` probe and `/metrics` outside
/// any nesting, everything else under `/api`, tracing layered over all of
/// it.
pub fn create_router(state: Arc<AppState>) -> Router {
    let project_routes = Router::new()
        .route(
            "/projects/:project_id/sessions/:session_id/preview",
            get(previews::get_preview_status),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/preview/start",
            post(previews::start_preview),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/preview/stop",
            post(previews::stop_preview),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/pull",
            post(sessions::pull_session_branch),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/commit",
            post(sessions::commit_session_changes),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/revert",
            post(sessions::revert_to_commit),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/query",
            post(query::execute_query),
        )
        .route(
            "/projects/:project_id/sessions/:session_id/activity",
            get(stream::stream_activity),
        );

    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(crate::metrics::metrics_endpoint))
        .nest("/api", project_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
