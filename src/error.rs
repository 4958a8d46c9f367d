//! Error types and Axum response conversions.

use crate::storage::{RepositoryError, StorageError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures of the auth service and auth context.
///
/// The `Display` text is what the UI shows in its error banner.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("No authenticated user")]
    NotAuthenticated,

    #[error("Failed to sign message")]
    SignatureRequest,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Application error types.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidSignature | AuthError::NotAuthenticated => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::SignatureRequest => AppError::BadRequest(err.to_string()),
            AuthError::Repository(RepositoryError::Conflict(msg)) => AppError::Conflict(msg),
            AuthError::Repository(RepositoryError::NotFound) => {
                AppError::NotFound("Profile not found".to_string())
            }
            AuthError::Repository(e) => AppError::Internal(format!("Profile store error: {}", e)),
            AuthError::Storage(e) => AppError::Internal(format!("Session store error: {}", e)),
        }
    }
}
