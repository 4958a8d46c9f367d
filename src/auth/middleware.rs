//! Axum state and the per-client auth extractors.

use super::clients::{ClientId, ClientRegistry};
use super::context::AuthContext;
use crate::error::AppError;
use crate::middleware::client_cookie;
use crate::models::Profile;
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
}

/// The calling client's auth context.
///
/// The client id comes from the `client_id` middleware, or straight from the
/// cookie when that layer is absent. Without either the request is 401.
pub struct ClientAuth(pub Arc<AuthContext>);

impl FromRequestParts<AppState> for ClientAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let client = parts
            .extensions
            .get::<ClientId>()
            .cloned()
            .or_else(|| client_cookie(&parts.headers))
            .ok_or_else(|| AppError::Unauthorized("No authenticated user".to_string()))?;

        let auth = state
            .clients
            .context(&client)
            .await
            .map_err(|e| AppError::Internal(format!("Session store error: {}", e)))?;
        Ok(ClientAuth(auth))
    }
}

/// The user of the caller's stored session, re-checked on every request.
///
/// Returns 401 Unauthorized if there is no session or it went stale.
pub struct CurrentUser(pub Profile);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ClientAuth(auth) = ClientAuth::from_request_parts(parts, state).await?;
        auth.refresh()
            .await
            .user
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized("No authenticated user".to_string()))
    }
}

/// Optional variant: `None` instead of a 401.
impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        let user = match <CurrentUser as FromRequestParts<AppState>>::from_request_parts(
            parts, state,
        )
        .await
        {
            Ok(user) => Some(user),
            Err(AppError::Unauthorized(_)) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not resolve current user");
                None
            }
        };
        Ok(user)
    }
}
