//! Error taxonomy (spec.md §7).
//!
//! Sagas and workers return `anyhow::Result` for infrastructure calls
//! (cache/db/http), the same pattern as `auth/user_store.rs`'s `.context(...)`
//! usage. At the HTTP boundary every error collapses into one `AppError`,
//! which implements `IntoResponse` the way `auth::middleware::AuthError` and
//! `auth::api::AuthApiError` do, emitting the `{error, message,
//! correlationId}` body shape spec.md §7 mandates.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("authorization: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("state conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "state_conflict",
            AppError::NotFound(_) => "not_found",
            AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(rename = "correlationId")]
    correlation_id: String,
}

/// Per-request correlation id, threaded through from
/// `middleware::correlation` into every handler that constructs an error.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

impl Default for CorrelationId {
    fn default() -> Self {
        CorrelationId(uuid::Uuid::new_v4().to_string())
    }
}

/// Attaches a correlation id to an `AppError` at the point it is turned into
/// a response. Handlers pull the id out of request extensions and wrap
/// their terminal `Result<_, AppError>` with this before returning.
pub struct WithCorrelation(pub AppError, pub String);

impl IntoResponse for WithCorrelation {
    fn into_response(self) -> Response {
        let WithCorrelation(err, correlation_id) = self;
        tracing::warn!(
            %correlation_id,
            kind = err.kind(),
            "request failed: {}",
            err
        );
        let body = ErrorBody {
            error: err.kind(),
            message: err.to_string(),
            correlation_id,
        };
        (err.status(), Json(body)).into_response()
    }
}

/// Fallback `IntoResponse` for call sites that have no correlation id handy
/// (e.g. webhook handlers before the id has been established). Generates one
/// ad hoc so the response shape is always uniform.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        WithCorrelation(self, correlation_id).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Internal(format!("cache error: {e}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            AppError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn conflict_maps_to_409() {
        assert_eq!(
            AppError::Conflict("wrong state".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(
            AppError::NotFound("missing".into()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
