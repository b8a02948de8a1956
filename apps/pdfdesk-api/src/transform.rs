//! Transformation orchestration
//!
//! Each transformation checks its request parameters, opens an operation,
//! runs the validation phase over its input files, does the document work on
//! the blocking pool and stores the result as a processed temporary file.
//! Any failure after the operation exists marks it failed with the error's
//! message before the error is returned.

use crate::error::ApiError;
use crate::files::{bytes_to_mb, TemporaryFile};
use crate::models::{
    ImagesToPdfRequest, MergeRequest, PdfToImagesRequest, RotateRequest, SplitRequest,
};
use crate::operations::{Operation, OperationType};
use crate::state::AppState;
use pdfdesk_core::{
    build_zip, images_to_pdf, inspect, load_document, merge_documents, pdf_to_images, plan_split,
    resolve_page_span, rotate_document, split_by_mode, validate_angle, ArchiveEntry, ImageInput,
    Orientation, OutputFormat, PageSelection, PageSize, PdfDeskError, PdfInfo, PdfInput,
    RenderOptions, SplitMode, MAX_IMAGES_PER_PDF,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::path::Path;
use tracing::{error, info};
use uuid::Uuid;

pub const MERGE_MIN_FILES: usize = 2;
pub const MERGE_MAX_FILES: usize = 20;
pub const MERGE_MAX_PAGES: u32 = 500;
pub const MERGE_MAX_BYTES: i64 = 100 * 1024 * 1024;

/// What the validation phase requires of each input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image,
}

/// An input file that passed the validation phase, with its bytes
#[derive(Debug, Clone)]
pub struct LoadedInput {
    pub file: TemporaryFile,
    pub bytes: Vec<u8>,
}

/// A completed operation and the file it produced
#[derive(Debug, Clone)]
pub struct Outcome {
    pub operation: Operation,
    pub output: TemporaryFile,
    /// Operation-specific fields for the response
    pub details: Map<String, Value>,
}

/// Validation phase: every input must exist, be unexpired, still have its
/// bytes, and be of the required kind. Stops at the first offending file.
pub async fn load_inputs(
    state: &AppState,
    ids: &[Uuid],
    kind: InputKind,
) -> Result<Vec<LoadedInput>, ApiError> {
    let mut loaded = Vec::with_capacity(ids.len());
    for &id in ids {
        let file = match state.files.get(id).await {
            Ok(file) => file,
            Err(ApiError::NotFound(_)) => {
                return Err(ApiError::Validation(format!("File {} not found", id)))
            }
            Err(e) => return Err(e),
        };

        if state.files.is_expired(&file) {
            return Err(ApiError::Validation(format!(
                "File {} has expired",
                file.original_filename
            )));
        }
        if !state.files.file_exists(&file).await {
            return Err(ApiError::Validation(format!(
                "File {} is missing from storage",
                file.original_filename
            )));
        }
        match kind {
            InputKind::Pdf if !file.is_pdf() => {
                return Err(ApiError::Validation(format!(
                    "File {} is not a PDF",
                    file.original_filename
                )))
            }
            InputKind::Image if !file.is_image() => {
                return Err(ApiError::Validation(format!(
                    "File {} is not an image",
                    file.original_filename
                )))
            }
            _ => {}
        }

        let bytes = match state.files.read(&file).await {
            Ok(bytes) => bytes,
            Err(ApiError::NotFound(_)) => {
                return Err(ApiError::Validation(format!(
                    "File {} is missing from storage",
                    file.original_filename
                )))
            }
            Err(e) => return Err(e),
        };
        loaded.push(LoadedInput { file, bytes });
    }
    Ok(loaded)
}

async fn load_one(state: &AppState, id: Uuid, kind: InputKind) -> Result<LoadedInput, ApiError> {
    load_inputs(state, &[id], kind)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Validation(format!("File {} not found", id)))
}

/// Run CPU-bound document work on the blocking pool.
pub async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, PdfDeskError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("document task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Open an operation, mark it processing, drive `work` and record the outcome.
/// `work` is not polled until the operation is processing.
async fn tracked<W>(
    state: &AppState,
    operation_type: OperationType,
    inputs: &[Uuid],
    parameters: Value,
    work: W,
) -> Result<Outcome, ApiError>
where
    W: Future<Output = Result<(TemporaryFile, Map<String, Value>), ApiError>>,
{
    let mut operation = state
        .operations
        .create(operation_type, inputs, parameters)
        .await?;
    let operation_id = operation.id;

    state
        .operations
        .mark_processing(&mut operation)
        .await
        .map_err(|e| e.for_operation(operation_id))?;

    match work.await {
        Ok((output, details)) => {
            state
                .operations
                .mark_completed(&mut operation, output.id)
                .await
                .map_err(|e| e.for_operation(operation_id))?;
            Ok(Outcome {
                operation,
                output,
                details,
            })
        }
        Err(err) => {
            if let Err(mark) = state
                .operations
                .mark_failed(&mut operation, &err.to_string())
                .await
            {
                error!(operation_id = %operation_id, "Could not record failure: {}", mark);
            }
            Err(err.for_operation(operation_id))
        }
    }
}

/// Last path component of a caller-supplied name, if anything usable is left
fn base_name(requested: Option<&str>) -> Option<&str> {
    requested
        .and_then(|r| r.rsplit(|c: char| c == '/' || c == '\\').next())
        .map(str::trim)
        .filter(|r| !r.is_empty() && *r != "." && *r != "..")
}

/// Caller-supplied output name reduced to a bare filename ending in `ext`,
/// or `default` when none was given.
pub fn output_filename(requested: Option<&str>, default: &str, ext: &str) -> String {
    let name = base_name(requested).unwrap_or(default);
    let suffix = format!(".{}", ext);
    if name.to_ascii_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("document")
        .to_string()
}

fn details(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn pdf_input(input: LoadedInput) -> PdfInput {
    PdfInput::new(input.file.original_filename, input.bytes)
}

/// Summary of one PDF for the info and validate endpoints
#[derive(Debug, Clone, Serialize)]
pub struct PdfFileInfo {
    pub file_id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub size_mb: f64,
    #[serde(flatten)]
    pub info: PdfInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Inspect a loaded PDF, reporting read failures inline rather than raising.
pub async fn pdf_info(input: &LoadedInput) -> Result<PdfFileInfo, ApiError> {
    let bytes = input.bytes.clone();
    let inspected = tokio::task::spawn_blocking(move || inspect(&bytes))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("document task failed: {}", e)))?;

    let (info, error) = match inspected {
        Ok(info) => (info, None),
        Err(e) => (PdfInfo::default(), Some(e.to_string())),
    };
    Ok(PdfFileInfo {
        file_id: input.file.id,
        filename: input.file.original_filename.clone(),
        size_bytes: input.file.file_size,
        size_mb: bytes_to_mb(input.file.file_size),
        info,
        error,
    })
}

fn ensure_processable(info: &PdfFileInfo) -> Result<(), ApiError> {
    if let Some(error) = &info.error {
        return Err(ApiError::Validation(format!(
            "Could not read {}: {}",
            info.filename, error
        )));
    }
    if info.info.encrypted {
        return Err(PdfDeskError::Encrypted(info.filename.clone()).into());
    }
    Ok(())
}

fn check_merge_count(count: usize) -> Result<(), ApiError> {
    if count < MERGE_MIN_FILES {
        return Err(ApiError::Validation(format!(
            "At least {} files are required for merging",
            MERGE_MIN_FILES
        )));
    }
    if count > MERGE_MAX_FILES {
        return Err(ApiError::Validation(format!(
            "Maximum {} files can be merged at once",
            MERGE_MAX_FILES
        )));
    }
    Ok(())
}

pub async fn merge(state: &AppState, req: MergeRequest) -> Result<Outcome, ApiError> {
    check_merge_count(req.file_ids.len())?;
    let filename = output_filename(req.output_filename.as_deref(), "merged_document.pdf", "pdf");
    let parameters = json!({
        "output_filename": filename,
        "file_count": req.file_ids.len(),
    });

    tracked(state, OperationType::Merge, &req.file_ids, parameters, async {
        let inputs = load_inputs(state, &req.file_ids, InputKind::Pdf).await?;
        let total_bytes: i64 = inputs.iter().map(|i| i.file.file_size).sum();
        if total_bytes > MERGE_MAX_BYTES {
            return Err(ApiError::Validation(format!(
                "Combined file size {:.2}MB exceeds {}MB limit",
                bytes_to_mb(total_bytes),
                MERGE_MAX_BYTES / (1024 * 1024)
            )));
        }

        let documents: Vec<PdfInput> = inputs.into_iter().map(pdf_input).collect();
        let file_count = documents.len();
        let (merged, total_pages) = blocking(move || {
            let mut total_pages = 0u32;
            for doc in &documents {
                total_pages += load_document(&doc.name, &doc.bytes)?.get_pages().len() as u32;
            }
            if total_pages > MERGE_MAX_PAGES {
                return Err(PdfDeskError::InvalidInput(format!(
                    "Total pages ({}) exceeds the {} page limit",
                    total_pages, MERGE_MAX_PAGES
                )));
            }
            Ok((merge_documents(documents)?, total_pages))
        })
        .await?;

        let output = state.files.create_processed(&filename, &merged).await?;
        info!(total_pages, file_count, "Merged PDFs into {}", filename);
        Ok((
            output,
            details(json!({ "total_pages": total_pages, "files_merged": file_count })),
        ))
    })
    .await
}

pub async fn split(state: &AppState, req: SplitRequest) -> Result<Outcome, ApiError> {
    let mode = req.split_mode()?;
    let prefix = base_name(req.output_prefix.as_deref())
        .unwrap_or("page")
        .to_string();
    let parameters = json!({
        "mode": req.mode,
        "ranges": req.ranges,
        "pages_per_split": req.pages_per_split,
        "output_prefix": prefix,
    });

    tracked(state, OperationType::Split, &[req.file_id], parameters, async {
        let input = pdf_input(load_one(state, req.file_id, InputKind::Pdf).await?);
        let part_prefix = prefix.clone();
        let mode_name = describe_mode(&mode);
        let parts = blocking(move || split_by_mode(&input, &mode, &part_prefix)).await?;
        info!(parts = parts.len(), mode = %mode_name, "Split PDF");
        let names: Vec<String> = parts.iter().map(|p| p.filename.clone()).collect();
        let file_count = parts.len();

        let output = if let [only] = parts.as_slice() {
            state
                .files
                .create_processed(&only.filename, &only.bytes)
                .await?
        } else {
            let entries: Vec<ArchiveEntry> = parts
                .into_iter()
                .map(|p| ArchiveEntry::new(p.filename, p.bytes))
                .collect();
            let archive = blocking(move || build_zip(&entries)).await?;
            state
                .files
                .create_processed(&format!("{}_split.zip", prefix), &archive)
                .await?
        };

        let is_single_file = file_count == 1;
        Ok((
            output,
            details(json!({
                "file_count": file_count,
                "is_single_file": is_single_file,
                "file_type": if is_single_file { "PDF" } else { "ZIP" },
                "files": names,
            })),
        ))
    })
    .await
}

fn render_options(req: &PdfToImagesRequest) -> Result<RenderOptions, ApiError> {
    let format: OutputFormat = req.output_format.parse()?;
    let quality = u8::try_from(req.quality)
        .ok()
        .filter(|q| (1..=100).contains(q))
        .ok_or_else(|| ApiError::Validation("Quality must be between 1 and 100".into()))?;
    let options = RenderOptions {
        format,
        quality,
        dpi: req.dpi,
        start_page: req.start_page,
        end_page: req.end_page,
    };
    options.validate()?;
    Ok(options)
}

pub async fn convert_pdf_to_images(
    state: &AppState,
    req: PdfToImagesRequest,
) -> Result<Outcome, ApiError> {
    let options = render_options(&req)?;
    let parameters = json!({
        "output_format": options.format,
        "quality": options.quality,
        "dpi": options.dpi,
        "start_page": options.start_page,
        "end_page": options.end_page,
    });

    tracked(
        state,
        OperationType::ConvertToImage,
        &[req.file_id],
        parameters,
        async {
            let input = pdf_input(load_one(state, req.file_id, InputKind::Pdf).await?);
            let default_name = format!("{}_images.zip", file_stem(&input.name));
            let filename = output_filename(req.output_filename.as_deref(), &default_name, "zip");

            let rasterizer = state.rasterizer.clone();
            let render = options.clone();
            let rendered =
                blocking(move || pdf_to_images(&input, &render, rasterizer.as_ref())).await?;

            let output = state
                .files
                .create_processed(&filename, &rendered.archive)
                .await?;
            Ok((
                output,
                details(json!({
                    "pages_converted": rendered.pages.len(),
                    "output_format": options.format,
                    "dpi": options.dpi,
                })),
            ))
        },
    )
    .await
}

pub async fn convert_images_to_pdf(
    state: &AppState,
    req: ImagesToPdfRequest,
) -> Result<Outcome, ApiError> {
    if req.file_ids.is_empty() {
        return Err(ApiError::Validation("At least one image is required".into()));
    }
    if req.file_ids.len() > MAX_IMAGES_PER_PDF {
        return Err(ApiError::Validation(format!(
            "Maximum {} images can be converted at once",
            MAX_IMAGES_PER_PDF
        )));
    }
    let page_size: PageSize = req.page_size.parse()?;
    let orientation: Orientation = req.orientation.parse()?;
    let filename = output_filename(req.output_filename.as_deref(), "images_document.pdf", "pdf");
    let parameters = json!({
        "output_filename": filename,
        "page_size": page_size,
        "orientation": orientation,
    });

    tracked(
        state,
        OperationType::ConvertFromImage,
        &req.file_ids,
        parameters,
        async {
            let images: Vec<ImageInput> = load_inputs(state, &req.file_ids, InputKind::Image)
                .await?
                .into_iter()
                .map(|i| ImageInput::new(i.file.original_filename, i.bytes))
                .collect();
            let count = images.len();
            let pdf = blocking(move || images_to_pdf(&images, page_size, orientation)).await?;

            let output = state.files.create_processed(&filename, &pdf).await?;
            Ok((
                output,
                details(json!({
                    "images_converted": count,
                    "page_size": page_size,
                    "orientation": orientation,
                })),
            ))
        },
    )
    .await
}

pub async fn rotate(state: &AppState, req: RotateRequest) -> Result<Outcome, ApiError> {
    validate_angle(req.rotation_angle)?;
    let selection = PageSelection::parse(&req.pages)?;
    let filename = output_filename(req.output_filename.as_deref(), "rotated_document.pdf", "pdf");
    let parameters = json!({
        "rotation_angle": req.rotation_angle,
        "pages": req.pages,
        "output_filename": filename,
    });

    tracked(state, OperationType::Rotate, &[req.file_id], parameters, async {
        let input = pdf_input(load_one(state, req.file_id, InputKind::Pdf).await?);
        let angle = req.rotation_angle;
        let rotated = blocking(move || rotate_document(&input, angle, &selection)).await?;

        let output = state.files.create_processed(&filename, &rotated).await?;
        Ok((
            output,
            details(json!({
                "rotation_angle": angle,
                "pages": req.pages,
            })),
        ))
    })
    .await
}

/// Merge dry run: per-file info plus whether the merge would pass its limits.
pub async fn validate_merge(state: &AppState, req: &MergeRequest) -> Result<Value, ApiError> {
    check_merge_count(req.file_ids.len())?;
    let inputs = load_inputs(state, &req.file_ids, InputKind::Pdf).await?;

    let mut files = Vec::with_capacity(inputs.len());
    for input in &inputs {
        files.push(pdf_info(input).await?);
    }

    let total_pages: u32 = files.iter().map(|f| f.info.pages).sum();
    let total_bytes: i64 = files.iter().map(|f| f.size_bytes).sum();
    let mut issues = Vec::new();
    for file in &files {
        if let Some(error) = &file.error {
            issues.push(format!("Could not read {}: {}", file.filename, error));
        } else if file.info.encrypted {
            issues.push(PdfDeskError::Encrypted(file.filename.clone()).to_string());
        }
    }
    if total_pages > MERGE_MAX_PAGES {
        issues.push(format!(
            "Total pages ({}) exceeds the {} page limit",
            total_pages, MERGE_MAX_PAGES
        ));
    }
    if total_bytes > MERGE_MAX_BYTES {
        issues.push(format!(
            "Combined file size exceeds {}MB limit",
            MERGE_MAX_BYTES / (1024 * 1024)
        ));
    }

    Ok(json!({
        "valid": issues.is_empty(),
        "issues": issues,
        "files_info": files,
        "total_pages": total_pages,
        "total_size_mb": bytes_to_mb(total_bytes),
        "estimated_output_size_mb": bytes_to_mb(total_bytes),
    }))
}

pub async fn split_info(state: &AppState, file_id: Uuid) -> Result<Value, ApiError> {
    let input = load_one(state, file_id, InputKind::Pdf).await?;
    let info = pdf_info(&input).await?;
    let can_split = info.error.is_none() && !info.info.encrypted && info.info.pages > 1;
    Ok(json!({
        "file_info": info,
        "can_split": can_split,
        "split_modes": ["all_pages", "page_ranges", "every_n_pages"],
    }))
}

pub async fn validate_split(state: &AppState, req: &SplitRequest) -> Result<Value, ApiError> {
    let mode = req.split_mode()?;
    let input = load_one(state, req.file_id, InputKind::Pdf).await?;
    let info = pdf_info(&input).await?;
    ensure_processable(&info)?;

    let groups = plan_split(info.info.pages, &mode)?;
    Ok(json!({
        "valid": true,
        "total_pages": info.info.pages,
        "output_count": groups.len(),
        "page_groups": groups,
        "will_zip": groups.len() > 1,
        "mode": req.mode,
    }))
}

pub async fn validate_pdf_to_images(
    state: &AppState,
    req: &PdfToImagesRequest,
) -> Result<Value, ApiError> {
    let options = render_options(req)?;
    let input = load_one(state, req.file_id, InputKind::Pdf).await?;
    let info = pdf_info(&input).await?;
    ensure_processable(&info)?;

    let pages = resolve_page_span(info.info.pages, options.start_page, options.end_page)?;
    Ok(json!({
        "valid": true,
        "total_pages": info.info.pages,
        "pages_to_convert": pages.len(),
        "output_format": options.format,
        "dpi": options.dpi,
        "quality": options.quality,
    }))
}

pub async fn validate_rotate(state: &AppState, req: &RotateRequest) -> Result<Value, ApiError> {
    validate_angle(req.rotation_angle)?;
    let selection = PageSelection::parse(&req.pages)?;
    let input = load_one(state, req.file_id, InputKind::Pdf).await?;
    let info = pdf_info(&input).await?;
    ensure_processable(&info)?;

    let pages = selection.resolve(info.info.pages)?;
    Ok(json!({
        "valid": true,
        "total_pages": info.info.pages,
        "pages_affected": pages.len(),
        "pages": pages,
        "rotation_angle": req.rotation_angle,
    }))
}

/// Split mode name for log lines
pub fn describe_mode(mode: &SplitMode) -> String {
    match mode {
        SplitMode::AllPages => "all_pages".to_string(),
        SplitMode::PageRanges(ranges) => format!("page_ranges({})", ranges.len()),
        SplitMode::EveryNPages(n) => format!("every_{}_pages", n),
    }
}
