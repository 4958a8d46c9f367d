//! Profile endpoints for the signed-in user.

use crate::auth::{ClientAuth, CurrentUser};
use crate::error::AppError;
use crate::models::ProfileChanges;
use axum::{response::IntoResponse, Json};

/// GET /api/profile
pub async fn get_profile(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(user)
}

/// PATCH /api/profile: Partial update; `null` clears a field
pub async fn update_profile(
    CurrentUser(_user): CurrentUser,
    ClientAuth(auth): ClientAuth,
    Json(changes): Json<ProfileChanges>,
) -> Result<impl IntoResponse, AppError> {
    if changes.is_empty() {
        return Err(AppError::BadRequest("No fields to update".to_string()));
    }

    let user = auth.update_profile(changes).await?;
    Ok(Json(user))
}
