//! Auth API endpoints. Each one drives the caller's auth context and answers
//! with its resulting state.

use super::validate_address;
use crate::auth::ClientAuth;
use crate::error::AppError;
use crate::models::{LoginCredentials, RegisterRequest};
use axum::{http::StatusCode, response::IntoResponse, Json};

/// GET /api/auth/session: Current auth state, after re-checking the session
pub async fn session(ClientAuth(auth): ClientAuth) -> impl IntoResponse {
    Json(auth.refresh().await)
}

/// POST /api/auth/login: Sign in with a wallet signature
pub async fn login(
    ClientAuth(auth): ClientAuth,
    Json(req): Json<LoginCredentials>,
) -> Result<impl IntoResponse, AppError> {
    validate_address(&req.address)?;

    auth.login(req).await?;
    Ok(Json(auth.state()))
}

/// POST /api/auth/register: Create or overwrite the caller's profile
pub async fn register(
    ClientAuth(auth): ClientAuth,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_address(&req.address)?;

    let name = req.name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::BadRequest(
            "Name must be 1-100 characters".to_string(),
        ));
    }

    auth.register(req).await?;
    Ok(Json(auth.state()))
}

/// POST /api/auth/logout: Clear the session
pub async fn logout(ClientAuth(auth): ClientAuth) -> impl IntoResponse {
    auth.logout().await;
    StatusCode::NO_CONTENT
}

/// POST /api/auth/clear-error: Dismiss the error banner
pub async fn clear_error(ClientAuth(auth): ClientAuth) -> impl IntoResponse {
    auth.clear_error();
    Json(auth.state())
}
