//! Admin account management endpoints
//!
//! All routes here sit behind the super-admin route guard; the handlers
//! still enforce the self-operation and last-super-admin rules.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::auth::Claims;
use super::handlers::{error_response, map_error, ApiError, AppState};
use crate::security::{AdminUser, Role};

#[derive(Debug, Deserialize)]
pub struct CreateAdminRequest {
    pub username: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub id: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAdminRequest {
    pub id: String,
}

/// GET /api/auth/admin-list
pub async fn list_admins(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AdminUser>>, (StatusCode, Json<ApiError>)> {
    let admins = state.authenticator.list_admins().await.map_err(map_error)?;
    Ok(Json(admins))
}

/// POST /api/auth/admin-create
pub async fn create_admin(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Json(req): Json<CreateAdminRequest>,
) -> Result<(StatusCode, Json<AdminUser>), (StatusCode, Json<ApiError>)> {
    let Some(role) = Role::from_str(&req.role) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Unknown role"));
    };
    if req.username.is_empty() || req.password.len() < 8 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Username required and password must be at least 8 characters",
        ));
    }

    if state
        .authenticator
        .get_admin(&req.username)
        .await
        .map_err(map_error)?
        .is_some()
    {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Username already exists",
        ));
    }

    let user = state
        .authenticator
        .create_admin(&req.username, &req.password, role)
        .await
        .map_err(map_error)?;

    info!("Admin {} created account {} ({})", claims.sub, user.username, role);
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/auth/admin-reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    if req.new_password.len() < 8 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters",
        ));
    }

    let reset = state
        .authenticator
        .reset_password(&req.id, &req.new_password)
        .await
        .map_err(map_error)?;

    if !reset {
        return Err(error_response(StatusCode::NOT_FOUND, "Admin not found"));
    }

    info!("Admin {} reset password for account {}", claims.sub, req.id);
    Ok(Json(json!({"reset": true})))
}

/// PUT /api/auth/admin-update-role
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let Some(role) = Role::from_str(&req.role) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "Unknown role"));
    };

    let Some(target) = state
        .authenticator
        .get_admin_by_id(&req.id)
        .await
        .map_err(map_error)?
    else {
        return Err(error_response(StatusCode::NOT_FOUND, "Admin not found"));
    };

    if target.username == claims.sub {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Cannot change your own role",
        ));
    }

    if target.role == Role::SuperAdmin
        && role < Role::SuperAdmin
        && state
            .authenticator
            .count_super_admins()
            .await
            .map_err(map_error)?
            <= 1
    {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Cannot demote the last super admin",
        ));
    }

    state
        .authenticator
        .update_role(&req.id, role)
        .await
        .map_err(map_error)?;

    info!(
        "Admin {} changed role of {} to {}",
        claims.sub, target.username, role
    );
    Ok(Json(json!({"updated": true})))
}

/// POST /api/auth/admin-delete
pub async fn delete_admin(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Json(req): Json<DeleteAdminRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let Some(target) = state
        .authenticator
        .get_admin_by_id(&req.id)
        .await
        .map_err(map_error)?
    else {
        return Err(error_response(StatusCode::NOT_FOUND, "Admin not found"));
    };

    if target.username == claims.sub {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Cannot delete your own account",
        ));
    }

    if target.role == Role::SuperAdmin
        && state
            .authenticator
            .count_super_admins()
            .await
            .map_err(map_error)?
            <= 1
    {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Cannot delete the last super admin",
        ));
    }

    state
        .authenticator
        .delete_admin(&req.id)
        .await
        .map_err(map_error)?;

    info!("Admin {} deleted account {}", claims.sub, target.username);
    Ok(Json(json!({"deleted": true})))
}
