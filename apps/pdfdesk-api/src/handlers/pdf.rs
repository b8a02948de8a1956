//! PDF transformation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use pdfdesk_core::{MAX_DPI, MAX_IMAGES_PER_PDF, MAX_RENDER_PAGES, MAX_SPLIT_RANGES, MIN_DPI};
use serde_json::{json, Value};
use std::sync::Arc;

use super::parse_id;
use crate::error::ApiError;
use crate::files::MAX_UPLOAD_BYTES;
use crate::models::{
    ApiJson, FileRef, ImagesToPdfRequest, MergeRequest, OperationResponse, PdfToImagesRequest,
    RotateRequest, SplitRequest,
};
use crate::operations::OperationStatus;
use crate::state::AppState;
use crate::transform::{
    self, Outcome, MERGE_MAX_BYTES, MERGE_MAX_FILES, MERGE_MAX_PAGES, MERGE_MIN_FILES,
};

type Created = (StatusCode, Json<Value>);

/// 201 body shared by every transformation
fn created(state: &AppState, message: String, outcome: Outcome) -> Created {
    let mut operation = json!({
        "id": outcome.operation.id,
        "status": outcome.operation.status(),
        "output_file_id": outcome.output.id,
        "output_filename": outcome.output.original_filename,
        "download_url": state.download_url(outcome.output.id),
    });
    if let Value::Object(fields) = &mut operation {
        fields.extend(outcome.details);
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": message,
            "operation": operation,
        })),
    )
}

fn count(outcome: &Outcome, key: &str) -> u64 {
    outcome.details.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// Available operations and limits
pub async fn api_info() -> Json<Value> {
    Json(json!({
        "message": "PDF Operations API",
        "version": env!("CARGO_PKG_VERSION"),
        "available_operations": {
            "merge": {
                "endpoint": "/api/pdf/merge/",
                "method": "POST",
                "description": "Merge multiple PDF files into one",
            },
            "split": {
                "endpoint": "/api/pdf/split/",
                "method": "POST",
                "description": "Split a PDF into single pages, page ranges or fixed-size chunks",
            },
            "rotate": {
                "endpoint": "/api/pdf/rotate/",
                "method": "POST",
                "description": "Rotate all or selected pages",
            },
            "pdf_to_images": {
                "endpoint": "/api/pdf/convert/pdf-to-images/",
                "method": "POST",
                "description": "Convert PDF pages to images (PNG, JPEG, WEBP, TIFF)",
            },
            "images_to_pdf": {
                "endpoint": "/api/pdf/convert/images-to-pdf/",
                "method": "POST",
                "description": "Convert multiple images to a single PDF",
            },
        },
        "limits": {
            "max_file_size_mb": MAX_UPLOAD_BYTES / (1024 * 1024),
            "min_files_per_merge": MERGE_MIN_FILES,
            "max_files_per_merge": MERGE_MAX_FILES,
            "max_total_pages": MERGE_MAX_PAGES,
            "max_total_size_mb": MERGE_MAX_BYTES / (1024 * 1024),
            "max_split_ranges": MAX_SPLIT_RANGES,
            "max_pages_per_conversion": MAX_RENDER_PAGES,
            "dpi_range": [MIN_DPI, MAX_DPI],
            "max_images_per_pdf": MAX_IMAGES_PER_PDF,
            "supported_image_formats": ["JPEG", "PNG", "GIF", "BMP", "TIFF", "WEBP"],
            "supported_output_formats": ["PNG", "JPEG", "WEBP", "TIFF"],
        },
    }))
}

// ============================================================================
// Merge
// ============================================================================

pub async fn merge_pdfs(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<MergeRequest>,
) -> Result<Created, ApiError> {
    let outcome = transform::merge(&state, req).await?;
    let message = format!("Successfully merged {} PDFs", count(&outcome, "files_merged"));
    Ok(created(&state, message, outcome))
}

pub async fn validate_merge(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<MergeRequest>,
) -> Result<Json<Value>, ApiError> {
    let validation = transform::validate_merge(&state, &req).await?;
    Ok(Json(json!({ "success": true, "validation": validation })))
}

// ============================================================================
// Split
// ============================================================================

pub async fn split_pdf(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SplitRequest>,
) -> Result<Created, ApiError> {
    let outcome = transform::split(&state, req).await?;
    let files = count(&outcome, "file_count");
    let message = if files == 1 {
        "Successfully extracted 1 PDF".to_string()
    } else {
        format!("Successfully split PDF into {} files (ZIP)", files)
    };
    Ok(created(&state, message, outcome))
}

pub async fn split_info(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<FileRef>,
) -> Result<Json<Value>, ApiError> {
    let info = transform::split_info(&state, req.file_id).await?;
    Ok(Json(json!({ "success": true, "info": info })))
}

pub async fn validate_split(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SplitRequest>,
) -> Result<Json<Value>, ApiError> {
    let validation = transform::validate_split(&state, &req).await?;
    Ok(Json(json!({ "success": true, "validation": validation })))
}

// ============================================================================
// Conversion
// ============================================================================

pub async fn pdf_to_images(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<PdfToImagesRequest>,
) -> Result<Created, ApiError> {
    let outcome = transform::convert_pdf_to_images(&state, req).await?;
    let format = outcome
        .details
        .get("output_format")
        .and_then(Value::as_str)
        .unwrap_or("PNG")
        .to_string();
    let message = format!(
        "Successfully converted {} pages to {}",
        count(&outcome, "pages_converted"),
        format
    );
    Ok(created(&state, message, outcome))
}

pub async fn validate_pdf_to_images(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<PdfToImagesRequest>,
) -> Result<Json<Value>, ApiError> {
    let validation = transform::validate_pdf_to_images(&state, &req).await?;
    Ok(Json(json!({ "success": true, "validation": validation })))
}

pub async fn images_to_pdf(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ImagesToPdfRequest>,
) -> Result<Created, ApiError> {
    let outcome = transform::convert_images_to_pdf(&state, req).await?;
    let message = format!(
        "Successfully converted {} images to PDF",
        count(&outcome, "images_converted")
    );
    Ok(created(&state, message, outcome))
}

// ============================================================================
// Rotate
// ============================================================================

pub async fn rotate_pdf(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RotateRequest>,
) -> Result<Created, ApiError> {
    let angle = req.rotation_angle;
    let outcome = transform::rotate(&state, req).await?;
    let message = format!("Successfully rotated pages by {} degrees", angle);
    Ok(created(&state, message, outcome))
}

pub async fn validate_rotate(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RotateRequest>,
) -> Result<Json<Value>, ApiError> {
    let validation = transform::validate_rotate(&state, &req).await?;
    Ok(Json(json!({ "success": true, "validation": validation })))
}

// ============================================================================
// Operations
// ============================================================================

pub async fn operation_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(&id, "Operation")?;
    let operation = state.operations.get(id).await?;
    let is_expired = state.operations.is_expired(&operation);
    Ok(Json(json!({
        "success": true,
        "operation": OperationResponse::new(operation, is_expired),
    })))
}

/// 200 with a download link once completed, 202 while running, 400 after failure
///
/// A completed operation whose output file has been deleted or has expired
/// answers 410 rather than handing out a link that cannot be downloaded.
pub async fn operation_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = parse_id(&id, "Operation")?;
    let operation = state.operations.get(id).await?;
    let is_expired = state.operations.is_expired(&operation);
    let status = operation.status();

    match (status, operation.state.output_file()) {
        (OperationStatus::Completed, Some(output)) => {
            let file = state.files.get(output).await.map_err(|e| match e {
                ApiError::NotFound(_) => ApiError::Gone("Operation output is no longer available".into()),
                other => other,
            })?;
            if state.files.is_expired(&file) {
                return Err(ApiError::Gone("Operation output has expired".into()));
            }
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "Operation completed successfully",
                    "operation": OperationResponse::new(operation, is_expired),
                    "download_url": state.download_url(output),
                })),
            ))
        }
        (OperationStatus::Failed, _) => {
            let message = format!(
                "Operation failed: {}",
                operation.state.error_message().unwrap_or("unknown error")
            );
            Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "message": message,
                    "operation": OperationResponse::new(operation, is_expired),
                })),
            ))
        }
        (OperationStatus::Pending | OperationStatus::Processing, _) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "success": false,
                "message": format!("Operation is still {}", status),
                "operation": OperationResponse::new(operation, is_expired),
            })),
        )),
        (OperationStatus::Completed, None) => Err(ApiError::Internal(anyhow::anyhow!(
            "completed operation {} has no output file",
            id
        ))),
    }
}
