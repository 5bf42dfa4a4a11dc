//! The control-plane error taxonomy (§7). Engine-layer code speaks
//! `anyhow::Result`; everything that crosses the HTTP boundary is converted
//! into one of these closed variants so the transport mapping below is the
//! only place status codes are decided.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

#[derive(Debug)]
pub enum OrchestratorError {
    Unauthorized(String),
    NotFound(String),
    Forbidden(String),
    BadRequest(String),
    Conflict(String),
    EngineUnavailable(String),
    GitAuthMissing(String),
    GitConflict(String),
    PushFailed { message: String, sha: String },
    InvalidQuery(String),
    Timeout(String),
    Cancelled,
    Internal(String),
}

impl OrchestratorError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::GitAuthMissing(_) => "git_auth_missing",
            Self::GitConflict(_) => "git_conflict",
            Self::PushFailed { .. } => "push_failed",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::GitAuthMissing(_) => StatusCode::UNAUTHORIZED,
            Self::GitConflict(_) => StatusCode::CONFLICT,
            Self::PushFailed { .. } => StatusCode::CONFLICT,
            Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::from_u16(499).unwrap(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Forbidden(m)
            | Self::BadRequest(m)
            | Self::Conflict(m)
            | Self::EngineUnavailable(m)
            | Self::GitAuthMissing(m)
            | Self::GitConflict(m)
            | Self::InvalidQuery(m)
            | Self::Timeout(m)
            | Self::Internal(m) => m.clone(),
            Self::PushFailed { message, .. } => message.clone(),
            Self::Cancelled => "the operation was cancelled".to_string(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "internal error crossing the control-plane boundary");
        Self::Internal("an internal error occurred".to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let sha = match &self {
            Self::PushFailed { sha, .. } => Some(sha.clone()),
            _ => None,
        };
        let message = self.message();

        (status, Json(ErrorResponse { error: ErrorBody { code, message, sha } })).into_response()
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for OrchestratorError {}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("resource not found".to_string()),
            other => Self::internal(other),
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = OrchestratorError::NotFound("project".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn push_failed_carries_sha() {
        let err = OrchestratorError::PushFailed {
            message: "push rejected".to_string(),
            sha: "abc123".to_string(),
        };
        match &err {
            OrchestratorError::PushFailed { sha, .. } => assert_eq!(sha, "abc123"),
            _ => panic!("wrong variant"),
        }
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn cancelled_maps_to_499() {
        let err = OrchestratorError::Cancelled;
        assert_eq!(err.status().as_u16(), 499);
    }

    #[test]
    fn sqlx_row_not_found_becomes_not_found() {
        let err: OrchestratorError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "not_found");
    }
}
