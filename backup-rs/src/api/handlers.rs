//! Core API handlers: health and the admin session endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::auth::{Claims, JwtConfig};
use crate::archive::MessageStore;
use crate::backup::BackupQueue;
use crate::db::Db;
use crate::error::BackupError;
use crate::export::ExportManager;
use crate::provider::MailProvider;
use crate::security::{AdminUser, Authenticator, LoginRateLimiter, Role};

/// Shared application state
pub struct AppState {
    pub db: Db,
    pub authenticator: Authenticator,
    pub jwt_config: JwtConfig,
    pub login_limiter: LoginRateLimiter,
    pub store: MessageStore,
    pub exports: ExportManager,
    pub queue: Arc<BackupQueue>,
    pub provider: Arc<dyn MailProvider>,
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(msg: &str) -> Self {
        Self {
            error: msg.to_string(),
        }
    }
}

pub fn error_response(status: StatusCode, msg: &str) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError::new(msg)))
}

/// Map internal errors to HTTP status codes without leaking internals.
pub fn map_error(e: BackupError) -> (StatusCode, Json<ApiError>) {
    match e {
        BackupError::NotFound(ref msg) => error_response(StatusCode::NOT_FOUND, msg),
        BackupError::InvalidRequest(ref msg) => error_response(StatusCode::BAD_REQUEST, msg),
        BackupError::Unauthorized(ref msg) => error_response(StatusCode::FORBIDDEN, msg),
        BackupError::AuthenticationFailed => {
            error_response(StatusCode::UNAUTHORIZED, "Invalid credentials")
        }
        e => {
            error!("Internal error: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: AdminUser,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
}

/// GET /api/health - public liveness probe
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = state.db.ping().await.is_ok();
    let archive = state.store.root().exists();
    let status = if database && archive { "ok" } else { "degraded" };

    let code = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "database": database,
            "archive": archive,
        })),
    )
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    if !state.login_limiter.check(&req.username).await {
        warn!("Login rate limit hit for {}", req.username);
        return Err(error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many failed login attempts, try again later",
        ));
    }

    match state
        .authenticator
        .authenticate(&req.username, &req.password)
        .await
        .map_err(map_error)?
    {
        Some(user) => {
            state.login_limiter.reset(&req.username).await;
            let token = state
                .jwt_config
                .create_token(&user.username, user.role)
                .map_err(|e| {
                    error!("Failed to create token: {}", e);
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
                })?;

            info!("Admin {} logged in", user.username);
            Ok(Json(LoginResponse { token, user }))
        }
        None => {
            state.login_limiter.record_failure(&req.username).await;
            Err(error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid credentials",
            ))
        }
    }
}

/// POST /api/auth/logout
///
/// Tokens are stateless, so there is nothing to revoke server-side; the
/// endpoint exists so clients have a uniform sign-out call.
pub async fn logout(claims: Claims) -> StatusCode {
    info!("Admin {} logged out", claims.sub);
    StatusCode::NO_CONTENT
}

/// GET /api/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    claims: Claims,
) -> Result<Json<AdminUser>, (StatusCode, Json<ApiError>)> {
    match state
        .authenticator
        .get_admin(&claims.sub)
        .await
        .map_err(map_error)?
    {
        Some(user) => Ok(Json(user)),
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Account no longer exists",
        )),
    }
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    claims: Claims,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    if req.new_password.len() < 8 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "New password must be at least 8 characters",
        ));
    }

    let changed = state
        .authenticator
        .change_password(&claims.sub, &req.current_password, &req.new_password)
        .await
        .map_err(map_error)?;

    if changed {
        info!("Admin {} changed password", claims.sub);
        Ok(Json(json!({"changed": true})))
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "Current password is incorrect",
        ))
    }
}

/// POST /api/auth/setup - first-run bootstrap from the login screen.
/// Refused as soon as any admin account exists.
pub async fn setup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetupRequest>,
) -> Result<(StatusCode, Json<AdminUser>), (StatusCode, Json<ApiError>)> {
    if state.authenticator.count_admins().await.map_err(map_error)? > 0 {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "Setup already completed",
        ));
    }

    if req.username.is_empty() || req.password.len() < 8 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Username required and password must be at least 8 characters",
        ));
    }

    let user = state
        .authenticator
        .create_admin(&req.username, &req.password, Role::SuperAdmin)
        .await
        .map_err(map_error)?;

    info!("Initial super admin {} created via setup", user.username);
    Ok((StatusCode::CREATED, Json(user)))
}
