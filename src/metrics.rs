//! Prometheus metrics (§10.5): installed the same way as the teacher's own
//! `/metrics` endpoint, with gauges/counters named for this subsystem
//! instead of generic app/deployment counts.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

use crate::AppState;

pub const PREVIEW_STARTS_TOTAL: &str = "preview_starts_total";
pub const PREVIEW_START_FAILURES_TOTAL: &str = "preview_start_failures_total";
pub const SESSION_DB_PROVISIONS_TOTAL: &str = "session_db_provisions_total";
pub const GIT_PUSH_FAILURES_TOTAL: &str = "git_push_failures_total";
pub const ACTIVITY_STREAM_CONNECTIONS: &str = "activity_stream_connections";
pub const ACTIVITY_STREAM_POLL_DURATION_SECONDS: &str = "activity_stream_poll_duration_seconds";

pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_counter!(PREVIEW_STARTS_TOTAL, "Total number of preview start attempts");
    describe_counter!(PREVIEW_START_FAILURES_TOTAL, "Total number of preview starts that failed");
    describe_counter!(SESSION_DB_PROVISIONS_TOTAL, "Total number of session databases created");
    describe_counter!(GIT_PUSH_FAILURES_TOTAL, "Total number of git pushes that failed");
    describe_gauge!(ACTIVITY_STREAM_CONNECTIONS, "Number of currently open activity stream connections");
    describe_histogram!(ACTIVITY_STREAM_POLL_DURATION_SECONDS, "Duration of each activity stream database poll");

    handle
}

pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics_handle.as_ref() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "metrics not initialized".to_string()),
    }
}

pub fn record_preview_start_attempt() {
    counter!(PREVIEW_STARTS_TOTAL).increment(1);
}

pub fn record_preview_start_failure() {
    counter!(PREVIEW_START_FAILURES_TOTAL).increment(1);
}

pub fn record_session_db_provisioned() {
    counter!(SESSION_DB_PROVISIONS_TOTAL).increment(1);
}

pub fn record_git_push_failure() {
    counter!(GIT_PUSH_FAILURES_TOTAL).increment(1);
}

pub fn set_activity_stream_connections(count: i64) {
    gauge!(ACTIVITY_STREAM_CONNECTIONS).set(count as f64);
}

pub fn record_activity_poll_duration(duration_secs: f64) {
    histogram!(ACTIVITY_STREAM_POLL_DURATION_SECONDS).record(duration_secs);
}
