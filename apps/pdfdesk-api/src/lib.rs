//! pdfdesk API - temporary file store and PDF processing backend
//!
//! Provides REST endpoints for:
//! - Uploading, downloading and expiring temporary files
//! - Merging, splitting and rotating PDFs
//! - Converting between PDFs and images
//! - Looking up the outcome of a tracked operation

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod error;
pub mod files;
pub mod handlers;
pub mod models;
pub mod operations;
pub mod routes;
pub mod state;
pub mod storage;
pub mod transform;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
