use std::sync::Arc;

use anyhow::anyhow;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use placement_backup_core::{backup_error, BackupError, BackupRun, BackupStats, BackupStatus};
use placement_backup_storage::{BackupService, RestoreReport, VerifyReport};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::scheduler::{Scheduler, SchedulerStatus};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BackupService>,
    pub scheduler: Arc<Scheduler>,
    pub api_token: Option<String>,
}

pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Backup(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Backup(err)
    }
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        ApiError::Backup(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_owned()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Backup(e) => {
                let status = match backup_error(&e) {
                    Some(BackupError::BackupNotFound(_)) => StatusCode::NOT_FOUND,
                    Some(err) if err.is_busy() => StatusCode::CONFLICT,
                    Some(BackupError::NotRestorable { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!(error = %format!("{e:#}"), "request failed");
                }
                (status, format!("{e:#}"))
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/backups", get(list_backups).post(run_backup))
        .route("/api/v1/backups/{id}", get(backup_detail).delete(delete_backup))
        .route("/api/v1/backups/{id}/restore", post(restore_backup))
        .route("/api/v1/backups/{id}/verify", get(verify_backup))
        .route("/api/v1/backups/{id}/download", get(download_backup))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/scheduler", get(scheduler_status))
        .route("/api/v1/scheduler/start", post(scheduler_start))
        .route("/api/v1/scheduler/stop", post(scheduler_stop))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid backup id: {raw}")))
}

async fn list_backups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<BackupRun>>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.service.list_backups().await?))
}

async fn run_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<BackupRun>), ApiError> {
    require_api_auth(&state, &headers)?;
    let run = state.scheduler.run_now().await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn backup_detail(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BackupRun>, ApiError> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    let run = state
        .service
        .get_backup(id)
        .await?
        .ok_or(BackupError::BackupNotFound(id))?;
    Ok(Json(run))
}

async fn delete_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    require_api_auth(&state, &headers)?;
    state.service.delete_backup(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RestoreReport>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.service.restore_backup(parse_id(&id)?).await?))
}

async fn verify_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VerifyReport>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.service.verify_backup(parse_id(&id)?).await?))
}

async fn download_backup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_api_auth(&state, &headers)?;
    let id = parse_id(&id)?;
    let run = state
        .service
        .get_backup(id)
        .await?
        .ok_or(BackupError::BackupNotFound(id))?;
    if run.status != BackupStatus::Success {
        return Err(BackupError::NotRestorable {
            id,
            status: run.status,
        }
        .into());
    }

    let path = state.service.archive_path(&run);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("archive path has no file name: {}", path.display()))?;
    let bytes = std::fs::read(&path)
        .map_err(|e| anyhow!("read archive {}: {e}", path.display()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={file_name}"),
            ),
        ],
        bytes,
    )
        .into_response())
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BackupStats>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.service.get_stats().await?))
}

async fn scheduler_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerStatus>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(state.scheduler.status()))
}

async fn scheduler_start(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerStatus>, ApiError> {
    require_api_auth(&state, &headers)?;
    state.scheduler.start();
    Ok(Json(state.scheduler.status()))
}

async fn scheduler_stop(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerStatus>, ApiError> {
    require_api_auth(&state, &headers)?;
    state.scheduler.stop();
    Ok(Json(state.scheduler.status()))
}
