use thiserror::Error;

#[derive(Error, Debug)]
pub enum HaulbookError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid image format. Supported formats: JPG, PNG, PDF ({0})")]
    InvalidFormat(String),

    #[error("Image size too large. Maximum size: 10MB (got {0} bytes)")]
    FileTooLarge(usize),

    #[error("Image size too small. Minimum size: 1KB (got {0} bytes)")]
    FileTooSmall(usize),

    /// Text recognition failed. `retryable` is false for input problems
    /// caught before the recognizer ran.
    #[error("OCR processing failed: {cause}")]
    OcrProcessing { cause: String, retryable: bool },

    #[error("Receipt not found: {0}")]
    ReceiptNotFound(String),

    #[error("Receipt {id} has already been {status}")]
    AlreadyVerified { id: String, status: String },

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Rejection reason is required when rejecting a receipt")]
    MissingRejectionReason,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid verified data: {0}")]
    InvalidVerifiedData(String),

    #[error("Bulk verification accepts 1 to {max} receipts, got {got}")]
    BulkLimit { max: usize, got: usize },

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl HaulbookError {
    pub fn ocr(cause: impl Into<String>) -> Self {
        Self::OcrProcessing {
            cause: cause.into(),
            retryable: true,
        }
    }

    /// Worth another attempt after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OcrProcessing { retryable, .. } => *retryable,
            Self::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HaulbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_error_message_wraps_cause() {
        let err = HaulbookError::ocr("provider timed out");
        assert_eq!(err.to_string(), "OCR processing failed: provider timed out");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_input_errors_are_not_retryable() {
        let empty = HaulbookError::OcrProcessing {
            cause: "Empty image buffer".to_string(),
            retryable: false,
        };
        assert!(!empty.is_retryable());
        assert!(!HaulbookError::FileTooSmall(12).is_retryable());
        assert!(!HaulbookError::MissingRejectionReason.is_retryable());
    }
}
