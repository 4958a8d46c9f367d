//! Permission lookups for gating UI actions.

use crate::auth::{has_permission, ClientAuth, CurrentUser, Permission, RolePermissions};
use crate::error::AppError;
use crate::models::Role;
use axum::{extract::Path, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub struct PermissionCheck {
    pub permission: Permission,
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
pub struct RoleInfo {
    pub role: Role,
    pub label: &'static str,
    pub description: &'static str,
    pub permissions: &'static RolePermissions,
}

/// GET /api/permissions: Every flag for the current user (all false when anonymous)
pub async fn list_permissions(user: Option<CurrentUser>) -> impl IntoResponse {
    let flags: Map<String, Value> = Permission::ALL
        .into_iter()
        .map(|p| {
            let allowed = user
                .as_ref()
                .is_some_and(|CurrentUser(u)| has_permission(u.role, p));
            (p.as_str().to_string(), Value::Bool(allowed))
        })
        .collect();
    Json(flags)
}

/// GET /api/permissions/{flag}
pub async fn check_permission(
    ClientAuth(auth): ClientAuth,
    Path(flag): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let permission = flag.parse::<Permission>().map_err(AppError::BadRequest)?;
    let state = auth.refresh().await;

    Ok(Json(PermissionCheck {
        permission,
        allowed: state.has_permission(permission),
    }))
}

/// GET /api/roles: Role catalogue for the registration form
pub async fn list_roles() -> impl IntoResponse {
    let roles: Vec<RoleInfo> = Role::ALL
        .into_iter()
        .map(|role| RoleInfo {
            role,
            label: role.label(),
            description: role.description(),
            permissions: RolePermissions::for_role(role),
        })
        .collect();
    Json(roles)
}
