use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::job::JobStatus;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A Postgres error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Failed to obtain a pooled connection.
    #[error("Connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Failed to build the connection pool.
    #[error("Connection pool setup error: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored row is missing a column or holds an inconsistent value.
    #[error("Missing or inconsistent data: {0}")]
    MissingData(String),

    /// Bad credentials. The message never says which half was wrong.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session is gone and could not be refreshed.
    #[error("Session expired")]
    SessionExpired,

    /// Wrong role, inactive account, or not the assigned technician.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// A request field failed validation.
    #[error("Validation error on `{field}`: {message}")]
    Validation { field: String, message: String },

    /// The referenced technician does not exist or is inactive.
    #[error("Unknown or inactive technician")]
    UnknownTechnician,

    /// The job is done and accepts no further changes.
    #[error("Job is closed")]
    JobClosed,

    /// The requested status is not ahead of the current one.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The row changed since it was read. Re-read and retry.
    #[error("Job was modified concurrently")]
    ConcurrentModification,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// The identity service or another collaborator could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Shorthand for a validation failure on a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::CreatePool(_)
            | AppError::Redis(_)
            | AppError::UpstreamUnavailable(_) => "upstream_unavailable",
            AppError::MissingData(_) | AppError::Internal(_) => "internal",
            AppError::Authentication(_) => "authentication_failed",
            AppError::SessionExpired => "session_expired",
            AppError::Authorization(_) => "forbidden",
            AppError::Validation { .. } => "validation_error",
            AppError::UnknownTechnician => "unknown_technician",
            AppError::JobClosed => "job_closed",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::ConcurrentModification => "concurrent_modification",
            AppError::NotFound => "not_found",
            AppError::RateLimitExceeded(_) => "rate_limited",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let mut field = None;

        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Connection pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::CreatePool(ref e) => {
                tracing::error!("Connection pool setup error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::UpstreamUnavailable(ref msg) => {
                tracing::error!("Upstream unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Service temporarily unavailable".to_string())
            }

            AppError::MissingData(ref msg) => {
                tracing::error!("Inconsistent stored data: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::SessionExpired => {
                tracing::debug!("Session expired");
                (StatusCode::UNAUTHORIZED, "Session expired".to_string())
            }

            AppError::Authorization(ref reason) => {
                tracing::warn!("Authorization failed: {}", reason);
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Validation { field: ref f, ref message } => {
                tracing::debug!("Validation error on {}: {}", f, message);
                field = Some(f.clone());
                (StatusCode::BAD_REQUEST, message.clone())
            }

            AppError::UnknownTechnician => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Technician does not exist or is inactive".to_string(),
            ),

            AppError::JobClosed => (StatusCode::CONFLICT, "Job is already done".to_string()),

            AppError::InvalidTransition { from, to } => (
                StatusCode::CONFLICT,
                format!("Cannot move a job from {} to {}", from.label(), to.label()),
            ),

            AppError::ConcurrentModification => (
                StatusCode::CONFLICT,
                "Job was changed by someone else, reload and try again".to_string(),
            ),

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                (StatusCode::TOO_MANY_REQUESTS, msg.clone())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message,
            "code": code,
            "field": field,
            "retryable": code == "concurrent_modification",
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rule_failures_are_not_server_errors() {
        let cases = [
            (AppError::UnknownTechnician, StatusCode::UNPROCESSABLE_ENTITY),
            (AppError::JobClosed, StatusCode::CONFLICT),
            (
                AppError::InvalidTransition {
                    from: JobStatus::InProgress,
                    to: JobStatus::New,
                },
                StatusCode::CONFLICT,
            ),
            (AppError::ConcurrentModification, StatusCode::CONFLICT),
            (AppError::validation("service", "required"), StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn upstream_failures_hide_collaborator_text() {
        let response =
            AppError::UpstreamUnavailable("connect ECONNREFUSED 10.0.0.4".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
