use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::usage::models::DenyReason;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Terminal, user-caused. Carries the numbers the client needs to explain the denial.
    #[error("Quota exceeded ({}): {remaining} of {limit} remaining", reason.code())]
    QuotaExceeded {
        reason: DenyReason,
        remaining: u32,
        limit: u32,
    },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::QuotaExceeded {
                reason,
                remaining,
                limit,
            } => {
                let body = Json(json!({
                    "error": {
                        "code": reason.code(),
                        "message": reason.message(),
                        "remaining": remaining,
                        "limit": limit
                    }
                }));
                return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            }
            AppError::GenerationFailed(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "GENERATION_FAILED",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_maps_to_429() {
        let response = AppError::QuotaExceeded {
            reason: DenyReason::NoCreditsRemaining,
            remaining: 0,
            limit: 5,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_generation_failed_maps_to_422() {
        let response = AppError::GenerationFailed("no job description".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_quota_error_display_uses_code() {
        let err = AppError::QuotaExceeded {
            reason: DenyReason::DailyLimitReached,
            remaining: 0,
            limit: 20,
        };
        assert!(err.to_string().contains("DAILY_LIMIT_REACHED"));
    }
}
