//! Ingestion CLI error types

use skincare_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error for {path}: {message}")]
    PdfParseError { path: String, message: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("No text content in {0}")]
    EmptyContent(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] AppError),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IngestionError {
    /// Whether the whole batch should stop rather than skip the file
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestionError::Pipeline(e) => matches!(
                e,
                AppError::Configuration { .. }
                    | AppError::DatabaseConnection { .. }
                    | AppError::Cancelled { .. }
            ),
            IngestionError::DirectoryNotFound(_) => true,
            _ => false,
        }
    }
}
