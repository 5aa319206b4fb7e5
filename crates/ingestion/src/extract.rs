//! Text extraction for local files
//!
//! PDFs go through lopdf page by page; plain-text formats are read as UTF-8.

use crate::errors::IngestionError;
use std::path::Path;
use tracing::{debug, warn};

/// How a file's text is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    PlainText,
}

impl SourceKind {
    /// Classify by extension; `None` for formats we cannot read
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceKind::Pdf),
            "txt" | "md" | "markdown" | "csv" | "tsv" => Some(SourceKind::PlainText),
            _ => None,
        }
    }

    pub fn mime_type(&self, path: &Path) -> &'static str {
        match self {
            SourceKind::Pdf => "application/pdf",
            SourceKind::PlainText => match path.extension().and_then(|e| e.to_str()) {
                Some("md") | Some("markdown") => "text/markdown",
                Some("csv") => "text/csv",
                Some("tsv") => "text/tab-separated-values",
                _ => "text/plain",
            },
        }
    }
}

/// Extract cleaned text from a supported file
pub fn extract_text(path: &Path) -> Result<String, IngestionError> {
    let kind = SourceKind::from_path(path)
        .ok_or_else(|| IngestionError::UnsupportedFile(path.display().to_string()))?;

    let raw = match kind {
        SourceKind::Pdf => extract_pdf_text(path)?,
        SourceKind::PlainText => std::fs::read_to_string(path)?,
    };

    let cleaned = clean_text(&raw);
    if cleaned.is_empty() {
        return Err(IngestionError::EmptyContent(path.display().to_string()));
    }

    debug!(
        path = %path.display(),
        original_len = raw.len(),
        cleaned_len = cleaned.len(),
        "Text extraction complete"
    );
    Ok(cleaned)
}

fn extract_pdf_text(path: &Path) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load(path).map_err(|e| IngestionError::PdfParseError {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    if text.trim().is_empty() {
        return Err(IngestionError::PdfParseError {
            path: path.display().to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }
    Ok(text)
}

/// Collapse whitespace per line, drop blank lines and byte-order marks
fn clean_text(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
