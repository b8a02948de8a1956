//! Router construction

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::files::MAX_UPLOAD_BYTES;
use crate::handlers::{self, files, pdf};
use crate::state::AppState;

/// Headroom for multipart framing around the largest allowed file
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

pub fn router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Temporary files
        .route(
            "/api/files/upload/",
            post(files::upload_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/files/download/:id/", get(files::download_file))
        .route("/api/files/info/:id/", get(files::file_info))
        .route("/api/files/delete/:id/", delete(files::delete_file))
        .route("/api/files/list/", get(files::list_files))
        .route("/api/files/stats/", get(files::storage_stats))
        .route("/api/files/cleanup/", post(files::cleanup_files))
        // PDF operations
        .route("/api/pdf/", get(pdf::api_info))
        .route("/api/pdf/merge/", post(pdf::merge_pdfs))
        .route("/api/pdf/merge/validate/", post(pdf::validate_merge))
        .route("/api/pdf/split/", post(pdf::split_pdf))
        .route("/api/pdf/split/info/", post(pdf::split_info))
        .route("/api/pdf/split/validate/", post(pdf::validate_split))
        .route("/api/pdf/convert/pdf-to-images/", post(pdf::pdf_to_images))
        .route(
            "/api/pdf/convert/pdf-to-images/validate/",
            post(pdf::validate_pdf_to_images),
        )
        .route("/api/pdf/convert/images-to-pdf/", post(pdf::images_to_pdf))
        .route("/api/pdf/rotate/", post(pdf::rotate_pdf))
        .route("/api/pdf/rotate/validate/", post(pdf::validate_rotate))
        .route("/api/pdf/operation/:id/", get(pdf::operation_status))
        .route("/api/pdf/operation/:id/result/", get(pdf::operation_result))
        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
