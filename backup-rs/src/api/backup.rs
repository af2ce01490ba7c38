//! Backup configuration and manual-run endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use super::handlers::{error_response, map_error, ApiError, AppState};
use crate::backup::BackupSettings;

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<i64>,
    pub max_concurrent_users: Option<i64>,
    pub batch_size: Option<i64>,
    pub batch_delay_ms: Option<i64>,
}

/// GET /api/backup/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BackupSettings>, (StatusCode, Json<ApiError>)> {
    match BackupSettings::load(&state.db).await.map_err(map_error)? {
        Some(settings) => Ok(Json(settings)),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            "Backup settings not initialized",
        )),
    }
}

/// PUT /api/backup/config
///
/// Saves the new values and applies the limits to the running queue.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateConfigRequest>,
) -> Result<Json<BackupSettings>, (StatusCode, Json<ApiError>)> {
    let Some(mut settings) = BackupSettings::load(&state.db).await.map_err(map_error)? else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            "Backup settings not initialized",
        ));
    };

    if let Some(enabled) = req.enabled {
        settings.enabled = enabled;
    }
    if let Some(interval) = req.interval_minutes {
        settings.interval_minutes = interval;
    }
    if let Some(max) = req.max_concurrent_users {
        settings.max_concurrent_users = max;
    }
    if let Some(batch_size) = req.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(delay) = req.batch_delay_ms {
        settings.batch_delay_ms = delay;
    }

    settings.save(&state.db).await.map_err(map_error)?;
    state.queue.apply_limits(&settings).await;

    info!("Backup settings updated");
    Ok(Json(settings))
}

/// POST /api/backup/manual - queue a run over all active mailboxes
pub async fn manual_run(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<ApiError>)> {
    let queued = state.queue.run_all().await.map_err(map_error)?;
    info!("Manual backup run queued {} mailboxes", queued);
    Ok((StatusCode::ACCEPTED, Json(json!({"queued": queued}))))
}
