use thiserror::Error;

#[derive(Error, Debug)]
pub enum PdfDeskError {
    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Invalid page range: {0}")]
    InvalidRange(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("PDF {0} is encrypted and cannot be processed")]
    Encrypted(String),

    #[error("Image processing failed: {0}")]
    ImageError(String),

    #[error("Page rendering failed: {0}")]
    RenderError(String),

    #[error("Failed to build archive: {0}")]
    ArchiveError(String),

    #[error("PDF operation failed: {0}")]
    OperationError(String),
}

impl PdfDeskError {
    /// True when the failure was caused by the request (bad parameters or an
    /// unsupported document), false when the library itself failed.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PdfDeskError::InvalidRange(_)
                | PdfDeskError::InvalidInput(_)
                | PdfDeskError::Encrypted(_)
        )
    }
}

impl From<image::ImageError> for PdfDeskError {
    fn from(err: image::ImageError) -> Self {
        PdfDeskError::ImageError(err.to_string())
    }
}

impl From<zip::result::ZipError> for PdfDeskError {
    fn from(err: zip::result::ZipError) -> Self {
        PdfDeskError::ArchiveError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_are_classified() {
        assert!(PdfDeskError::InvalidRange("x".into()).is_caller_error());
        assert!(PdfDeskError::InvalidInput("x".into()).is_caller_error());
        assert!(PdfDeskError::Encrypted("a.pdf".into()).is_caller_error());
        assert!(!PdfDeskError::ParseError("x".into()).is_caller_error());
        assert!(!PdfDeskError::OperationError("x".into()).is_caller_error());
    }

    #[test]
    fn test_encrypted_message_names_document() {
        let msg = PdfDeskError::Encrypted("secret.pdf".into()).to_string();
        assert!(msg.contains("secret.pdf"));
        assert!(msg.contains("encrypted"));
    }
}
