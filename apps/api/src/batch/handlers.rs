use std::path::Path as FsPath;
use std::time::Duration;

use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::batch::registry::{BatchOutcome, BatchStatus, BatchView};
use crate::batch::{BatchConfig, BatchRequest, JobSource, ProgressSnapshot};
use crate::errors::AppError;
use crate::report::{report_filename, structured, tabular, ReportFormat};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SubmitResponse {
    pub batch_id: Uuid,
    pub total_jobs: usize,
    pub config: BatchConfig,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    pub percent_complete: f64,
    pub finished: bool,
}

impl From<ProgressSnapshot> for ProgressResponse {
    fn from(snapshot: ProgressSnapshot) -> Self {
        Self {
            percent_complete: snapshot.percent_complete(),
            finished: snapshot.is_finished(),
            snapshot,
        }
    }
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub cancel_requested: bool,
}

/// POST /api/v1/batches
///
/// Multipart body: one `files` part per resume, plus optional text parts
/// overriding the server's batch defaults.
pub async fn handle_submit(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let staging = tempfile::Builder::new()
        .prefix("analyzer-batch-")
        .tempdir()
        .map_err(|e| AppError::Internal(e.into()))?;

    let mut config = state.config.batch_defaults;
    let mut sources = Vec::new();
    let limit_bytes = state.config.max_file_size_mb * 1024 * 1024;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" {
            let file_name = display_name(field.file_name().unwrap_or_default());
            let stored = format!("{}-{}", sources.len(), sanitize_file_name(&file_name));
            let path = staging.path().join(stored);
            let size = stage_upload(field, &path, &file_name, limit_bytes).await?;
            debug!(file = %file_name, bytes = size, "Staged upload");
            sources.push(JobSource::new(file_name, path, size));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        apply_override(&mut config, &name, value.trim())?;
    }

    let total_jobs = sources.len();
    let run = state
        .scheduler
        .prepare(BatchRequest::new(sources, config), CancellationToken::new())?;
    let config = *run.config();
    let batch_id = state.registry.launch(run, Some(staging)).await;

    info!(%batch_id, total_jobs, "Batch accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            batch_id,
            total_jobs,
            config,
        }),
    ))
}

/// GET /api/v1/batches/:id/progress
pub async fn handle_progress(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressResponse>, AppError> {
    state
        .registry
        .progress(id)
        .await
        .map(|snapshot| Json(snapshot.into()))
        .ok_or_else(|| not_found(id))
}

/// POST /api/v1/batches/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    let status = state.registry.cancel(id).await.ok_or_else(|| not_found(id))?;
    info!(batch_id = %id, ?status, "Cancellation requested");
    Ok(Json(CancelResponse {
        batch_id: id,
        status,
        cancel_requested: true,
    }))
}

/// GET /api/v1/batches/:id
pub async fn handle_get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, AppError> {
    state
        .registry
        .view(id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// GET /api/v1/batches/:id/report.csv
pub async fn handle_csv_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    render_report(&state, id, ReportFormat::Csv).await
}

/// GET /api/v1/batches/:id/report.json
pub async fn handle_json_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    render_report(&state, id, ReportFormat::Json).await
}

async fn render_report(
    state: &AppState,
    id: Uuid,
    format: ReportFormat,
) -> Result<Response, AppError> {
    let result = match state.registry.outcome(id).await {
        None => return Err(not_found(id)),
        Some(None) => {
            return Err(AppError::Conflict(format!("Batch {id} is still running")))
        }
        Some(Some(BatchOutcome::Aborted(message))) => {
            return Err(AppError::Conflict(format!(
                "Batch {id} produced no result: {message}"
            )))
        }
        Some(Some(BatchOutcome::Completed(result))) => result,
    };

    let body = match format {
        ReportFormat::Csv => tabular::to_csv(&result)?,
        ReportFormat::Json => structured::to_json(&result)?,
    };
    let disposition = format!(
        "attachment; filename=\"{}\"",
        report_filename(format, result.completed_at)
    );

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// Streams one file part to disk, giving up as soon as it passes `limit_bytes`.
async fn stage_upload(
    mut field: Field<'_>,
    path: &FsPath,
    file_name: &str,
    limit_bytes: u64,
) -> Result<u64, AppError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        written += chunk.len() as u64;
        if written > limit_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "'{file_name}' exceeds the {}MB upload limit",
                limit_bytes / (1024 * 1024)
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(written)
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Batch {id} not found"))
}

/// Applies one multipart text field to the batch config. Range checks happen
/// later in `BatchConfig::validate`; this only rejects unparseable values.
fn apply_override(config: &mut BatchConfig, field: &str, value: &str) -> Result<(), AppError> {
    match field {
        "batch_size" => config.batch_size = parse_field(field, value)?,
        "concurrency" => config.concurrency = parse_field(field, value)?,
        "max_retries" => config.max_retries = parse_field(field, value)?,
        "rate_limit_secs" => config.rate_limit_interval = parse_secs(field, value)?,
        "job_timeout_secs" => config.job_timeout = parse_secs(field, value)?,
        other => debug!(field = other, "Ignoring unknown multipart field"),
    }
    Ok(())
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|_| AppError::Validation(format!("'{field}' has invalid value '{value}'")))
}

fn parse_secs(field: &str, value: &str) -> Result<Duration, AppError> {
    let secs: f64 = parse_field(field, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        AppError::Validation(format!("'{field}' must be a non-negative number of seconds"))
    })
}

/// Name shown in reports: the client's file name without any directory part.
fn display_name(raw: &str) -> String {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let name: String = base.chars().filter(|c| !c.is_control()).collect();
    match name.trim() {
        "" | "." | ".." => "upload".to_string(),
        name => name.to_string(),
    }
}

/// Staging-file name: replaces anything outside `[A-Za-z0-9._-]`.
fn sanitize_file_name(raw: &str) -> String {
    let cleaned: String = display_name(raw)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_start_matches('.') {
        "" => "upload".to_string(),
        name => name.to_string(),
    }
}
