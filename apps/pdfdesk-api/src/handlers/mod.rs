//! HTTP request handlers for the pdfdesk API
//!
//! - `files`: upload, download and housekeeping of temporary files
//! - `pdf`: document transformations and operation lookups

pub mod files;
pub mod pdf;

use crate::error::ApiError;
use uuid::Uuid;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Identifiers that do not parse can never match a record.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::NotFound(format!("{} {} not found", what, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "File").unwrap(), id);

        let err = parse_id("not-a-uuid", "File").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "File not-a-uuid not found");
    }
}
