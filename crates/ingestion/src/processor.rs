//! Batch ingestion processor
//!
//! Walks a directory, extracts each supported file, then registers and embeds
//! it through the same pipeline the gateway uses.

use crate::errors::IngestionError;
use crate::extract::{extract_text, SourceKind};
use serde::Serialize;
use skincare_common::{
    ingest::{EmbedOptions, IngestFile, IngestRequest},
    CancelToken, RagServices,
};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Settings applied to every file of a batch
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Document source label, e.g. "guideline" or "faq"
    pub source: Option<String>,
    pub embed: EmbedOptions,
}

/// Result for one file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub path: PathBuf,
    pub document_id: Uuid,
    pub chunk_count: usize,
    /// Some chunks could not be embedded
    pub partial: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub processed: Vec<FileOutcome>,
    pub failed: Vec<FailedFile>,
    /// Files with an extension we do not read
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: PathBuf,
    pub error: String,
}

/// Ingestion processor
pub struct IngestionProcessor {
    services: RagServices,
    options: BatchOptions,
}

impl IngestionProcessor {
    pub fn new(services: RagServices, options: BatchOptions) -> Self {
        Self { services, options }
    }

    /// Extract, register and embed a single file
    #[instrument(skip(self, cancel), fields(path = %path.display()))]
    pub async fn process_file(&self, path: &Path, cancel: &CancelToken) -> Result<FileOutcome, IngestionError> {
        let kind = SourceKind::from_path(path)
            .ok_or_else(|| IngestionError::UnsupportedFile(path.display().to_string()))?;
        let text = extract_text(path)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let size_bytes = std::fs::metadata(path).ok().map(|m| m.len() as i64);
        let url = format!("file://{}", std::fs::canonicalize(path)?.display());

        let ingest = self.services.ingest();
        let registered = ingest
            .ingest(IngestRequest {
                title,
                source: self.options.source.clone(),
                status: None,
                content: Some(text),
                files: vec![IngestFile {
                    file_name,
                    url,
                    mime_type: Some(kind.mime_type(path).to_string()),
                    size_bytes,
                    text: None,
                }],
            })
            .await?;

        let report = ingest
            .embed(registered.document_id, self.options.embed.clone(), cancel)
            .await?;

        if report.failed {
            warn!(
                doc_id = %registered.document_id,
                failed_chunks = ?report.failed_chunks,
                "Some chunks failed to embed"
            );
        }

        Ok(FileOutcome {
            path: path.to_path_buf(),
            document_id: registered.document_id,
            chunk_count: report.chunk_count,
            partial: report.failed,
        })
    }

    /// Process every supported file directly under `dir`, in name order.
    ///
    /// Per-file failures are collected; configuration, connection and
    /// cancellation errors stop the batch.
    #[instrument(skip(self, cancel), fields(dir = %dir.display()))]
    pub async fn process_directory(&self, dir: &Path, cancel: &CancelToken) -> Result<BatchReport, IngestionError> {
        if !dir.is_dir() {
            return Err(IngestionError::DirectoryNotFound(dir.display().to_string()));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        info!(files = paths.len(), "Processing directory");
        let mut report = BatchReport::default();

        for path in paths {
            if SourceKind::from_path(&path).is_none() {
                debug!(path = %path.display(), "Skipping unsupported file");
                report.skipped += 1;
                continue;
            }

            match self.process_file(&path, cancel).await {
                Ok(outcome) => {
                    info!(
                        path = %path.display(),
                        doc_id = %outcome.document_id,
                        chunk_count = outcome.chunk_count,
                        "File ingested"
                    );
                    report.processed.push(outcome);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to ingest file");
                    report.failed.push(FailedFile {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Directory processing complete"
        );
        Ok(report)
    }
}
