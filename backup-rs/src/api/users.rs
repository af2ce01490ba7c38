//! Mailbox (user) management endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use super::handlers::{error_response, map_error, ApiError, AppState};
use crate::backup::BackupJob;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub domain_id: String,
    pub email: String,
    pub status: String,
    pub connected: bool,
    pub last_backup_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

type UserRow = (String, String, String, String, i64, Option<String>, String);

const SELECT: &str = "SELECT id, domain_id, email, status, connected, last_backup_at, \
                      created_at FROM users";

fn user_from_row(row: UserRow) -> UserResponse {
    let (id, domain_id, email, status, connected, last_backup_at, created_at) = row;
    UserResponse {
        id,
        domain_id,
        email,
        status,
        connected: connected != 0,
        last_backup_at,
        created_at,
    }
}

fn db_error(e: sqlx::Error) -> (StatusCode, Json<ApiError>) {
    error!("Database error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

async fn fetch_user(
    state: &AppState,
    id: &str,
) -> Result<UserResponse, (StatusCode, Json<ApiError>)> {
    let row: Option<UserRow> = sqlx::query_as(&state.db.sql(&format!("{} WHERE id = ?", SELECT)))
        .bind(id)
        .fetch_optional(state.db.pool())
        .await
        .map_err(db_error)?;

    row.map(user_from_row)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "User not found"))
}

/// GET /api/users - optionally filtered by ?domain_id=
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<UserResponse>>, (StatusCode, Json<ApiError>)> {
    let rows: Vec<UserRow> = match params.get("domain_id") {
        Some(domain_id) => {
            let sql = state
                .db
                .sql(&format!("{} WHERE domain_id = ? ORDER BY email", SELECT));
            sqlx::query_as(&sql)
                .bind(domain_id)
                .fetch_all(state.db.pool())
                .await
                .map_err(db_error)?
        }
        None => {
            let sql = state.db.sql(&format!("{} ORDER BY email", SELECT));
            sqlx::query_as(&sql)
                .fetch_all(state.db.pool())
                .await
                .map_err(db_error)?
        }
    };

    Ok(Json(rows.into_iter().map(user_from_row).collect()))
}

/// GET /api/users/:id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ApiError>)> {
    Ok(Json(fetch_user(&state, &id).await?))
}

/// PATCH /api/users/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ApiError>)> {
    if req.status != "active" && req.status != "paused" {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Status must be active or paused",
        ));
    }

    let mut user = fetch_user(&state, &id).await?;

    sqlx::query(&state.db.sql("UPDATE users SET status = ? WHERE id = ?"))
        .bind(&req.status)
        .bind(&id)
        .execute(state.db.pool())
        .await
        .map_err(db_error)?;

    info!("User {} set to {}", user.email, req.status);
    user.status = req.status;
    Ok(Json(user))
}

async fn set_connected(
    state: &AppState,
    id: &str,
    connected: bool,
) -> Result<UserResponse, (StatusCode, Json<ApiError>)> {
    let mut user = fetch_user(state, id).await?;

    sqlx::query(&state.db.sql("UPDATE users SET connected = ? WHERE id = ?"))
        .bind(connected as i64)
        .bind(id)
        .execute(state.db.pool())
        .await
        .map_err(db_error)?;

    user.connected = connected;
    Ok(user)
}

/// POST /api/users/:id/connect
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ApiError>)> {
    Ok(Json(set_connected(&state, &id, true).await?))
}

/// POST /api/users/:id/disconnect
pub async fn disconnect(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, (StatusCode, Json<ApiError>)> {
    Ok(Json(set_connected(&state, &id, false).await?))
}

/// POST /api/users/:id/backup - queue an immediate backup
pub async fn backup_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<BackupJob>), (StatusCode, Json<ApiError>)> {
    let job = state.queue.enqueue_user(&id).await.map_err(map_error)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/users/:id/imap-status
pub async fn imap_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let user = fetch_user(&state, &id).await?;
    Ok(Json(json!({
        "connected": user.connected,
        "status": user.status,
        "last_backup_at": user.last_backup_at,
    })))
}

/// GET /api/users/:id/stats
pub async fn user_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let user = fetch_user(&state, &id).await?;
    let (email_count, total_size) = state.store.user_stats(&id).await.map_err(|e| {
        error!("Stats for {} failed: {}", user.email, e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to compute stats")
    })?;

    Ok(Json(json!({
        "email_count": email_count,
        "total_size": total_size,
        "last_backup_at": user.last_backup_at,
    })))
}

/// DELETE /api/users/:id - removes the mailbox row and its archived mail
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let user = fetch_user(&state, &id).await?;

    let removed = state.store.delete_for_user(&id).await.map_err(|e| {
        error!("Purging archive for {} failed: {}", user.email, e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to purge archive")
    })?;

    sqlx::query(&state.db.sql("DELETE FROM users WHERE id = ?"))
        .bind(&id)
        .execute(state.db.pool())
        .await
        .map_err(db_error)?;

    info!("User {} deleted ({} archived messages removed)", user.email, removed);
    Ok(Json(json!({"deleted": true, "emails_removed": removed})))
}
