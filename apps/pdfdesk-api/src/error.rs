//! Error types for the pdfdesk API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pdfdesk_core::PdfDeskError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad parameters, unsupported files, or inputs that cannot be used
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Gone(String),

    /// The document library failed on otherwise valid input
    #[error("{0}")]
    Processing(String),

    #[error("Failed to store file: {0}")]
    StorageWrite(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Any of the above, raised while an operation record was open
    #[error("{source}")]
    Operation {
        operation_id: String,
        #[source]
        source: Box<ApiError>,
    },
}

impl ApiError {
    /// Attach the id of the operation this error terminated.
    pub fn for_operation(self, operation_id: impl ToString) -> Self {
        match self {
            already @ ApiError::Operation { .. } => already,
            other => ApiError::Operation {
                operation_id: operation_id.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Processing(_)
            | ApiError::StorageWrite(_)
            | ApiError::Database(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Operation { source, .. } => source.status_code(),
        }
    }

    /// Message shown to clients; database and internal details stay in the log.
    fn public_message(&self) -> String {
        match self {
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                "Internal error".to_string()
            }
            ApiError::StorageWrite(msg) => {
                tracing::error!("Storage write failed: {}", msg);
                self.to_string()
            }
            ApiError::Operation { source, .. } => source.public_message(),
            other => other.to_string(),
        }
    }
}

impl From<PdfDeskError> for ApiError {
    fn from(err: PdfDeskError) -> Self {
        if err.is_caller_error() {
            ApiError::Validation(err.to_string())
        } else {
            ApiError::Processing(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.public_message();

        let body = match &self {
            ApiError::Operation { operation_id, .. } => json!({
                "success": false,
                "message": message,
                "operation_id": operation_id,
            }),
            _ => json!({
                "success": false,
                "message": message,
            }),
        };

        (status, Json(body)).into_response()
    }
}
