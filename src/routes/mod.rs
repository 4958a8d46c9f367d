//! API route handlers.

pub mod auth;
pub mod permissions;
pub mod profile;

use crate::auth::middleware::AppState;
use crate::error::AppError;
use axum::{routing::get, routing::post, Router};

/// Validate that a string looks like a wallet address (`0x` + 40 hex chars).
pub fn validate_address(address: &str) -> Result<(), AppError> {
    let hex = address.trim().strip_prefix("0x").unwrap_or_default();
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::BadRequest("Invalid address format".to_string()));
    }
    Ok(())
}

/// Build the API router with all endpoints.
pub fn api_router() -> Router<AppState> {
    Router::new()
        // Auth endpoints
        .route("/api/auth/session", get(auth::session))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/clear-error", post(auth::clear_error))
        // Profile endpoints
        .route(
            "/api/profile",
            get(profile::get_profile).patch(profile::update_profile),
        )
        // Permission endpoints
        .route("/api/permissions", get(permissions::list_permissions))
        .route("/api/permissions/{flag}", get(permissions::check_permission))
        .route("/api/roles", get(permissions::list_roles))
}
