//! Temporary file endpoints

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::parse_id;
use crate::cleanup::{run_cleanup, CleanupOptions};
use crate::error::ApiError;
use crate::files::{validate_upload, TemporaryFile};
use crate::models::FileResponse;
use crate::state::AppState;

/// Multipart form field carrying the upload
const UPLOAD_FIELD: &str = "file";

async fn describe(state: &AppState, file: TemporaryFile) -> FileResponse {
    let is_expired = state.files.is_expired(&file);
    let file_exists = state.files.file_exists(&file).await;
    let file_url = state.download_url(file.id);
    FileResponse::new(file, is_expired, file_exists, file_url)
}

/// Upload a file (multipart field `file`)
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut upload: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid file data: {}", e.body_text())))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| ApiError::Validation("The uploaded file has no filename".into()))?;
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Invalid file data: {}", e.body_text())))?;
        upload = Some((filename, content_type, bytes));
        break;
    }

    let (filename, content_type, bytes) =
        upload.ok_or_else(|| ApiError::Validation("No file was submitted".into()))?;
    validate_upload(&filename, content_type.as_deref(), bytes.len())?;

    let file = state
        .files
        .create(&filename, &bytes, content_type.as_deref())
        .await?;
    let file = describe(&state, file).await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "File uploaded successfully",
            "file": file,
        })),
    ))
}

/// `attachment` disposition; characters unsafe in a quoted header value are replaced.
fn content_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

/// Download a file's bytes
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "File")?;
    let file = state.files.get(id).await?;

    if state.files.is_expired(&file) {
        return Err(ApiError::Gone("File has expired".into()));
    }
    if !state.files.file_exists(&file).await {
        return Err(ApiError::NotFound("File not found on storage".into()));
    }

    let bytes = state.files.read(&file).await?;
    Ok((
        [
            (header::CONTENT_TYPE, file.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&file.original_filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub async fn file_info(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id, "File")?;
    let file = state.files.get(id).await?;
    let file = describe(&state, file).await;
    Ok(Json(json!({ "success": true, "file": file })))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id, "File")?;
    let file = state.files.get(id).await?;
    state.files.remove(&file).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("File \"{}\" deleted successfully", file.original_filename),
    })))
}

/// Non-expired files, newest first
pub async fn list_files(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let active = state.files.list_active().await?;
    let mut files = Vec::with_capacity(active.len());
    for file in active {
        files.push(describe(&state, file).await);
    }
    Ok(Json(json!({
        "success": true,
        "count": files.len(),
        "files": files,
    })))
}

pub async fn storage_stats(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let stats = state.files.stats().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

/// Manual expiry sweep
pub async fn cleanup_files(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let report = run_cleanup(&state, CleanupOptions::default()).await?;
    if report.files_deleted < report.files_matched {
        warn!(
            matched = report.files_matched,
            deleted = report.files_deleted,
            "Some expired files could not be removed"
        );
    }
    info!(files = report.files_deleted, "Manual cleanup");
    Ok(Json(json!({
        "success": true,
        "message": format!("Cleaned up {} expired files", report.files_deleted),
        "files_deleted": report.files_deleted,
        "operations_deleted": report.operations_deleted,
    })))
}
