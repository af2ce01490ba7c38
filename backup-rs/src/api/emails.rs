//! Archived email endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use super::handlers::{error_response, ApiError, AppState};
use crate::archive::{mime, EmailRecord, SearchQuery};

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub emails: Vec<EmailRecord>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Serialize)]
pub struct AttachmentInfo {
    pub index: usize,
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
}

fn internal(msg: &str) -> (StatusCode, Json<ApiError>) {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, msg)
}

/// GET /api/emails/search
pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ApiError>)> {
    let query = SearchQuery {
        user_id: params.get("user_id").cloned(),
        q: params.get("q").cloned(),
        folder: params.get("folder").cloned(),
        date_from: params.get("date_from").cloned(),
        date_to: params.get("date_to").cloned(),
        page: params
            .get("page")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        limit: params
            .get("limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(50),
    };

    let (emails, total) = state.store.search(&query).await.map_err(|e| {
        error!("Email search failed: {}", e);
        internal("Search failed")
    })?;

    Ok(Json(SearchResponse {
        emails,
        total,
        page: query.page.max(1),
        limit: query.limit.clamp(1, 500),
    }))
}

/// GET /api/emails/:id - metadata plus parsed bodies and attachment list
pub async fn get_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let Some(record) = state.store.get(&id).await.map_err(|e| {
        error!("Email lookup failed: {}", e);
        internal("Lookup failed")
    })?
    else {
        return Err(error_response(StatusCode::NOT_FOUND, "Email not found"));
    };

    let raw = state
        .store
        .read_raw(&record)
        .map_err(|_| error_response(StatusCode::NOT_FOUND, "Message file is missing"))?;
    let parsed = mime::parse_message(&raw);

    let attachments: Vec<AttachmentInfo> = parsed
        .attachments
        .iter()
        .enumerate()
        .map(|(index, part)| AttachmentInfo {
            index,
            filename: part.filename.clone(),
            content_type: part.content_type.clone(),
            size: part.body.len(),
        })
        .collect();

    Ok(Json(json!({
        "email": record,
        "text_body": parsed.text_body,
        "html_body": parsed.html_body,
        "attachments": attachments,
    })))
}

/// GET /api/emails/:id/attachments/:index
///
/// Served inline by default; `?download=true` switches the disposition so
/// browsers save instead of render.
pub async fn get_attachment(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(String, usize)>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let part = match state.store.attachment(&id, index).await {
        Ok(Some(part)) => part,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "Attachment not found").into_response()
        }
        Err(e) => {
            error!("Attachment lookup failed: {}", e);
            return internal("Lookup failed").into_response();
        }
    };

    let filename = part.filename.clone().unwrap_or_else(|| "attachment".to_string());
    let disposition = if params.get("download").map(|v| v == "true").unwrap_or(false) {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!("inline; filename=\"{}\"", filename)
    };

    let body = match part.decoded_body() {
        Ok(body) => body,
        Err(e) => {
            error!("Attachment decode failed: {}", e);
            return internal("Decode failed").into_response();
        }
    };

    let headers = [
        (header::CONTENT_TYPE, part.content_type.clone()),
        (header::CONTENT_DISPOSITION, disposition),
    ];

    (headers, body).into_response()
}

/// DELETE /api/emails/:id
pub async fn delete_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let deleted = state.store.delete(&id).await.map_err(|e| {
        error!("Email delete failed: {}", e);
        internal("Delete failed")
    })?;

    if !deleted {
        return Err(error_response(StatusCode::NOT_FOUND, "Email not found"));
    }

    info!("Email {} deleted", id);
    Ok(Json(json!({"deleted": true})))
}

/// DELETE /api/emails/bulk
pub async fn delete_bulk(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    if req.ids.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "No ids given"));
    }
    if req.ids.len() > 1000 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "At most 1000 ids per request",
        ));
    }

    let deleted = state.store.delete_bulk(&req.ids).await.map_err(|e| {
        error!("Bulk delete failed: {}", e);
        internal("Delete failed")
    })?;

    info!("Bulk delete removed {} of {} emails", deleted, req.ids.len());
    Ok(Json(json!({"deleted": deleted})))
}
