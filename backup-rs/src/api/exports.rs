//! Export job endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use super::handlers::{error_response, map_error, ApiError, AppState};
use crate::export::{ExportFormat, ExportJob, ExportRequest, ExportStatus};

#[derive(Debug, Deserialize)]
pub struct CreateExportRequest {
    pub user_id: String,
    pub format: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// POST /api/exports
pub async fn create_export(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateExportRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<ApiError>)> {
    let Some(format) = ExportFormat::from_str(&req.format) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Format must be eml or pst",
        ));
    };

    let job = state
        .exports
        .create(ExportRequest {
            user_id: req.user_id,
            format,
            start_date: req.start_date,
            end_date: req.end_date,
        })
        .await
        .map_err(map_error)?;

    info!(
        "Export {} queued for user {} ({} messages)",
        job.id, job.user_id, job.total_messages
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": job.id,
            "status": job.status,
            "estimated_emails": job.total_messages,
            "estimated_time_minutes": job.estimated_minutes,
        })),
    ))
}

/// GET /api/exports
pub async fn list_exports(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let status = match params.get("status") {
        Some(s) => {
            let parsed = ExportStatus::from_str(s);
            if parsed.as_str() != s {
                return Err(error_response(StatusCode::BAD_REQUEST, "Unknown status"));
            }
            Some(parsed)
        }
        None => None,
    };
    let user_id = params.get("user_id").map(String::as_str);
    let page = params.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);

    let (exports, total) = state
        .exports
        .list(status, user_id, page, limit)
        .await
        .map_err(map_error)?;

    Ok(Json(json!({
        "exports": exports,
        "total": total,
        "page": page,
        "limit": limit,
    })))
}

/// GET /api/exports/:id
pub async fn get_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExportJob>, (StatusCode, Json<ApiError>)> {
    match state.exports.get(&id).await.map_err(map_error)? {
        Some(job) => Ok(Json(job)),
        None => Err(error_response(StatusCode::NOT_FOUND, "Export not found")),
    }
}

/// GET /api/exports/:id/download
pub async fn download_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let (job, path) = match state.exports.download(&id).await {
        Ok(result) => result,
        Err(e) => return map_error(e).into_response(),
    };

    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) => {
            error!("Reading export bundle {} failed: {}", job.filename, e);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read export file",
            )
                .into_response();
        }
    };

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", job.filename),
        ),
    ];

    (headers, content).into_response()
}

/// DELETE /api/exports/:id
pub async fn delete_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    if !state.exports.delete(&id).await.map_err(map_error)? {
        return Err(error_response(StatusCode::NOT_FOUND, "Export not found"));
    }
    info!("Export {} deleted", id);
    Ok(Json(json!({"deleted": true})))
}

/// POST /api/exports/:id/retry
pub async fn retry_export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ExportJob>), (StatusCode, Json<ApiError>)> {
    let job = state.exports.retry(&id).await.map_err(map_error)?;
    info!("Export {} queued for retry", id);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/exports/stats/overview
///
/// Export history counters plus the live backup-queue view.
pub async fn stats_overview(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let exports = state.exports.stats().await.map_err(map_error)?;
    let queue = state.queue.counters().await;

    Ok(Json(json!({
        "exports": exports,
        "queue": queue,
    })))
}
