//! Request and response models for the pdfdesk API

use crate::error::ApiError;
use crate::files::TemporaryFile;
use crate::operations::{Operation, OperationStatus, OperationType};
use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use chrono::{DateTime, Utc};
use pdfdesk_core::{PageRange, SplitMode, MAX_SPLIT_RANGES};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// JSON body whose rejections are reported as `{"success": false, ...}` 400s
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// File metadata as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_expired: bool,
    pub file_exists: bool,
    pub file_url: String,
}

impl FileResponse {
    pub fn new(file: TemporaryFile, is_expired: bool, file_exists: bool, file_url: String) -> Self {
        Self {
            id: file.id,
            original_filename: file.original_filename,
            file_size: file.file_size,
            mime_type: file.mime_type,
            uploaded_at: file.uploaded_at,
            expires_at: file.expires_at,
            is_expired,
            file_exists,
            file_url,
        }
    }
}

/// Operation record as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub input_files: Vec<Uuid>,
    pub output_file: Option<Uuid>,
    pub parameters: Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    /// Seconds from start to completion
    pub duration: Option<f64>,
    pub is_expired: bool,
}

impl OperationResponse {
    pub fn new(operation: Operation, is_expired: bool) -> Self {
        Self {
            duration: operation.duration_seconds(),
            status: operation.status(),
            output_file: operation.state.output_file(),
            error_message: operation.state.error_message().map(str::to_string),
            started_at: operation.state.started_at(),
            completed_at: operation.state.completed_at(),
            id: operation.id,
            operation_type: operation.operation_type,
            input_files: operation.input_files,
            parameters: operation.parameters,
            created_at: operation.created_at,
            expires_at: operation.expires_at,
            is_expired,
        }
    }
}

/// Request naming a single file
#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub file_ids: Vec<Uuid>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitModeName {
    #[default]
    AllPages,
    PageRanges,
    EveryNPages,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SplitRequest {
    pub file_id: Uuid,
    #[serde(default)]
    pub mode: SplitModeName,
    #[serde(default)]
    pub ranges: Option<Vec<PageRange>>,
    #[serde(default)]
    pub pages_per_split: Option<u32>,
    #[serde(default)]
    pub output_prefix: Option<String>,
}

impl SplitRequest {
    /// Check the mode's own arguments; page bounds are checked against the
    /// document later.
    pub fn split_mode(&self) -> Result<SplitMode, ApiError> {
        match self.mode {
            SplitModeName::AllPages => Ok(SplitMode::AllPages),
            SplitModeName::PageRanges => {
                let ranges = self.ranges.clone().unwrap_or_default();
                if ranges.is_empty() {
                    return Err(ApiError::Validation(
                        "Page ranges are required for page_ranges mode".into(),
                    ));
                }
                if ranges.len() > MAX_SPLIT_RANGES {
                    return Err(ApiError::Validation(format!(
                        "Maximum {} page ranges allowed",
                        MAX_SPLIT_RANGES
                    )));
                }
                if let Some(bad) = ranges.iter().find(|r| r.start < 1 || r.start > r.end) {
                    return Err(ApiError::Validation(format!(
                        "Invalid page range {}-{}",
                        bad.start, bad.end
                    )));
                }
                Ok(SplitMode::PageRanges(ranges))
            }
            SplitModeName::EveryNPages => match self.pages_per_split {
                Some(n) if n >= 1 => Ok(SplitMode::EveryNPages(n)),
                Some(_) => Err(ApiError::Validation(
                    "pages_per_split must be at least 1".into(),
                )),
                None => Err(ApiError::Validation(
                    "pages_per_split is required for every_n_pages mode".into(),
                )),
            },
        }
    }
}

fn default_output_format() -> String {
    "PNG".to_string()
}

fn default_quality() -> u32 {
    95
}

fn default_dpi() -> u32 {
    150
}

#[derive(Debug, Clone, Deserialize)]
pub struct PdfToImagesRequest {
    pub file_id: Uuid,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_quality")]
    pub quality: u32,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default)]
    pub start_page: Option<u32>,
    #[serde(default)]
    pub end_page: Option<u32>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

fn default_page_size() -> String {
    "A4".to_string()
}

fn default_orientation() -> String {
    "portrait".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesToPdfRequest {
    pub file_ids: Vec<Uuid>,
    #[serde(default)]
    pub output_filename: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: String,
    #[serde(default = "default_orientation")]
    pub orientation: String,
}

fn default_pages() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RotateRequest {
    pub file_id: Uuid,
    pub rotation_angle: i32,
    #[serde(default = "default_pages")]
    pub pages: String,
    #[serde(default)]
    pub output_filename: Option<String>,
}
