//! Domain management endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::handlers::{error_response, ApiError, AppState};
use crate::db::now_rfc3339;

#[derive(Debug, Serialize)]
pub struct DomainResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub user_count: i64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDomainRequest {
    pub name: String,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDomainRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

type DomainRow = (String, String, Option<String>, i64, i64, String);

const SELECT: &str = "SELECT d.id, d.name, d.description, d.enabled, \
                      (SELECT COUNT(*) FROM users u WHERE u.domain_id = d.id), d.created_at \
                      FROM domains d";

fn domain_from_row(row: DomainRow) -> DomainResponse {
    let (id, name, description, enabled, user_count, created_at) = row;
    DomainResponse {
        id,
        name,
        description,
        enabled: enabled != 0,
        user_count,
        created_at,
    }
}

fn db_error(e: sqlx::Error) -> (StatusCode, Json<ApiError>) {
    error!("Database error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

/// GET /api/domains
pub async fn list_domains(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DomainResponse>>, (StatusCode, Json<ApiError>)> {
    let rows: Vec<DomainRow> = sqlx::query_as(&state.db.sql(&format!("{} ORDER BY d.name", SELECT)))
        .fetch_all(state.db.pool())
        .await
        .map_err(db_error)?;

    Ok(Json(rows.into_iter().map(domain_from_row).collect()))
}

/// GET /api/domains/:id
pub async fn get_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DomainResponse>, (StatusCode, Json<ApiError>)> {
    let row: Option<DomainRow> =
        sqlx::query_as(&state.db.sql(&format!("{} WHERE d.id = ?", SELECT)))
            .bind(&id)
            .fetch_optional(state.db.pool())
            .await
            .map_err(db_error)?;

    match row {
        Some(row) => Ok(Json(domain_from_row(row))),
        None => Err(error_response(StatusCode::NOT_FOUND, "Domain not found")),
    }
}

/// POST /api/domains
pub async fn create_domain(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateDomainRequest>,
) -> Result<(StatusCode, Json<DomainResponse>), (StatusCode, Json<ApiError>)> {
    let name = req.name.trim().to_lowercase();
    if name.is_empty() || !name.contains('.') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid domain name",
        ));
    }

    let existing: Option<(String,)> =
        sqlx::query_as(&state.db.sql("SELECT id FROM domains WHERE name = ?"))
            .bind(&name)
            .fetch_optional(state.db.pool())
            .await
            .map_err(db_error)?;
    if existing.is_some() {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Domain already exists",
        ));
    }

    let domain = DomainResponse {
        id: Uuid::new_v4().to_string(),
        name,
        description: req.description,
        enabled: req.enabled.unwrap_or(true),
        user_count: 0,
        created_at: now_rfc3339(),
    };

    sqlx::query(&state.db.sql(
        "INSERT INTO domains (id, name, description, enabled, created_at) VALUES (?, ?, ?, ?, ?)",
    ))
    .bind(&domain.id)
    .bind(&domain.name)
    .bind(&domain.description)
    .bind(domain.enabled as i64)
    .bind(&domain.created_at)
    .execute(state.db.pool())
    .await
    .map_err(db_error)?;

    info!("Domain {} created", domain.name);
    Ok((StatusCode::CREATED, Json(domain)))
}

/// PUT /api/domains/:id
pub async fn update_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDomainRequest>,
) -> Result<Json<DomainResponse>, (StatusCode, Json<ApiError>)> {
    let row: Option<DomainRow> =
        sqlx::query_as(&state.db.sql(&format!("{} WHERE d.id = ?", SELECT)))
            .bind(&id)
            .fetch_optional(state.db.pool())
            .await
            .map_err(db_error)?;
    let Some(row) = row else {
        return Err(error_response(StatusCode::NOT_FOUND, "Domain not found"));
    };
    let mut domain = domain_from_row(row);

    if let Some(name) = req.name {
        let name = name.trim().to_lowercase();
        if name.is_empty() || !name.contains('.') {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "Invalid domain name",
            ));
        }
        if name != domain.name {
            let existing: Option<(String,)> =
                sqlx::query_as(&state.db.sql("SELECT id FROM domains WHERE name = ?"))
                    .bind(&name)
                    .fetch_optional(state.db.pool())
                    .await
                    .map_err(db_error)?;
            if existing.is_some() {
                return Err(error_response(
                    StatusCode::CONFLICT,
                    "Domain already exists",
                ));
            }
        }
        domain.name = name;
    }
    if let Some(description) = req.description {
        domain.description = Some(description);
    }
    if let Some(enabled) = req.enabled {
        domain.enabled = enabled;
    }

    sqlx::query(
        &state
            .db
            .sql("UPDATE domains SET name = ?, description = ?, enabled = ? WHERE id = ?"),
    )
    .bind(&domain.name)
    .bind(&domain.description)
    .bind(domain.enabled as i64)
    .bind(&id)
    .execute(state.db.pool())
    .await
    .map_err(db_error)?;

    Ok(Json(domain))
}

/// DELETE /api/domains/:id
///
/// Mailbox rows own archived data; a domain with users must be emptied
/// first.
pub async fn delete_domain(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let (users,): (i64,) =
        sqlx::query_as(&state.db.sql("SELECT COUNT(*) FROM users WHERE domain_id = ?"))
            .bind(&id)
            .fetch_one(state.db.pool())
            .await
            .map_err(db_error)?;
    if users > 0 {
        return Err(error_response(
            StatusCode::CONFLICT,
            "Domain still has users",
        ));
    }

    let result = sqlx::query(&state.db.sql("DELETE FROM domains WHERE id = ?"))
        .bind(&id)
        .execute(state.db.pool())
        .await
        .map_err(db_error)?;

    if result.rows_affected() == 0 {
        return Err(error_response(StatusCode::NOT_FOUND, "Domain not found"));
    }

    info!("Domain {} deleted", id);
    Ok(Json(json!({"deleted": true})))
}

/// POST /api/domains/:id/discover-users
///
/// Asks the mail provider which mailboxes exist for the domain and creates
/// rows for the ones not tracked yet.
pub async fn discover_users(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let row: Option<(String,)> =
        sqlx::query_as(&state.db.sql("SELECT name FROM domains WHERE id = ?"))
            .bind(&id)
            .fetch_optional(state.db.pool())
            .await
            .map_err(db_error)?;
    let Some((name,)) = row else {
        return Err(error_response(StatusCode::NOT_FOUND, "Domain not found"));
    };

    let discovered = state.provider.discover_users(&name).await.map_err(|e| {
        error!("Discovery for {} failed: {}", name, e);
        error_response(StatusCode::BAD_GATEWAY, "Mailbox discovery failed")
    })?;

    let mut created = 0u64;
    for email in &discovered {
        let existing: Option<(String,)> =
            sqlx::query_as(&state.db.sql("SELECT id FROM users WHERE email = ?"))
                .bind(email)
                .fetch_optional(state.db.pool())
                .await
                .map_err(db_error)?;
        if existing.is_some() {
            continue;
        }

        sqlx::query(&state.db.sql(
            "INSERT INTO users (id, domain_id, email, status, connected, created_at) \
             VALUES (?, ?, ?, ?, 0, ?)",
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&id)
        .bind(email)
        .bind("active")
        .bind(now_rfc3339())
        .execute(state.db.pool())
        .await
        .map_err(db_error)?;
        created += 1;
    }

    info!(
        "Discovery for {}: {} mailboxes, {} new",
        name,
        discovered.len(),
        created
    );
    Ok(Json(json!({
        "discovered": discovered.len(),
        "created": created,
    })))
}
