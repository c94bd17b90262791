//! Handlers for the `/files` resource.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use neuropixel_common::NeuroPixelError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::jobs::{JobStatus, ReconstructionJob};
use crate::state::AppState;

/// Multipart field carrying the image
const FILE_FIELD: &str = "file";

/// Response of a successful upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub file_id: Uuid,
    pub filename: String,
    pub status: JobStatus,
}

/// One row of the job listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ReconstructionJob> for FileSummary {
    fn from(job: ReconstructionJob) -> Self {
        Self {
            id: job.id,
            filename: job.filename,
            file_type: job.media_type,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Status and, once finished, results of one job.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub mean_reconstruction_b64: Option<String>,
    pub uncertainty_map_b64: Option<String>,
    pub error: Option<String>,
}

impl From<&ReconstructionJob> for StatusResponse {
    fn from(job: &ReconstructionJob) -> Self {
        let images = job.images();
        Self {
            id: job.id,
            filename: job.filename.clone(),
            status: job.status,
            mean_reconstruction_b64: images.map(|(mean, _)| mean.to_string()),
            uncertainty_map_b64: images.map(|(_, uncertainty)| uncertainty.to_string()),
            error: job.error().map(str::to_string),
        }
    }
}

/// Confirmation of a deletion.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// Pagination parameters for the listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::Core(NeuroPixelError::internal(format!("Blocking task failed: {e}")))
}

/// Read one multipart field, refusing to buffer more than `max_bytes + 1`.
async fn read_capped(
    field: &mut axum::extract::multipart::Field<'_>,
    max_bytes: usize,
) -> AppResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        data.extend_from_slice(&chunk);
        if data.len() > max_bytes {
            break;
        }
    }
    Ok(data)
}

/// POST /api/v1/files/upload
///
/// Accepts a multipart upload with a single `file` field, stores it and
/// schedules background processing.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let max_bytes = state.orchestrator.config().max_upload_bytes;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        tracing::info!(
            filename = field.file_name().unwrap_or("unknown"),
            content_type = %media_type,
            "Received file upload request"
        );

        // Reject the type before reading the body.
        state.orchestrator.validate_upload(&media_type, 1)?;
        let data = read_capped(&mut field, max_bytes).await?;

        let orchestrator = state.orchestrator.clone();
        let job = tokio::task::spawn_blocking(move || orchestrator.submit_upload(&media_type, &data))
            .await
            .map_err(join_error)??;

        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                message: "File uploaded successfully and scheduled for processing.".to_string(),
                file_id: job.id,
                filename: job.filename,
                status: job.status,
            }),
        ));
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field '{FILE_FIELD}'"
    )))
}

/// GET /api/v1/files/list
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<FileSummary>>> {
    let skip = params.skip.unwrap_or(0);
    let limit = params
        .limit
        .unwrap_or(state.config.server.default_list_limit);
    let jobs = state.orchestrator.list(skip, limit);
    Ok(Json(jobs.into_iter().map(FileSummary::from).collect()))
}

/// GET /api/v1/files/status/{id}
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StatusResponse>> {
    let job = state.orchestrator.status(id)?;
    Ok(Json(StatusResponse::from(&job)))
}

/// POST /api/v1/files/process/{id}
///
/// Re-runs processing. Rejected with 409 while the job is processing.
pub async fn process(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<StatusResponse>)> {
    let job = state.orchestrator.reprocess(id)?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::from(&job))))
}

/// DELETE /api/v1/files/{id}
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeleteResponse>> {
    let orchestrator = state.orchestrator.clone();
    tokio::task::spawn_blocking(move || orchestrator.delete(id))
        .await
        .map_err(join_error)??;
    Ok(Json(DeleteResponse {
        message: format!("File ID {id} deleted successfully"),
    }))
}
