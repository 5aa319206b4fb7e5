//! Document ingestion
//!
//! Two steps, each bound to its own endpoint:
//! 1. `ingest` records a document with its assets and merged text content
//! 2. `embed` chunks the content, embeds every chunk and writes it to the store

mod chunker;

pub use chunker::{chunk_text, Chunker, TextChunk};

use crate::config::AppConfig;
use crate::db::models::{DocumentStatus, IngestStatus};
use crate::db::{DocumentCatalog, NewAsset, NewDocument};
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::resilience::CancelToken;
use crate::services::RagServices;
use crate::vector::{NewChunk, VectorStore};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// File attached to an ingest request; its upload happened upstream
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFile {
    pub file_name: String,
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
    /// Extracted text, merged into the document when the file is text-like
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub title: String,
    pub source: Option<String>,
    pub status: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub files: Vec<IngestFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub document_id: Uuid,
    pub asset_count: usize,
    pub ingest_status: IngestStatus,
}

/// Chunking and model choice for one embed run; `None` takes the configured default
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedOptions {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub embedding_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedReport {
    /// Chunks written
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<i32>,
}

pub struct IngestService {
    config: Arc<AppConfig>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    catalog: Arc<dyn DocumentCatalog>,
}

fn has_text_extension(file_name: &str, extensions: &[String]) -> bool {
    let lowered = file_name.to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| lowered.ends_with(&ext.to_ascii_lowercase()))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl IngestService {
    pub fn new(services: &RagServices) -> Self {
        Self {
            config: services.config.clone(),
            embedder: services.embedder.clone(),
            store: services.store.clone(),
            catalog: services.catalog.clone(),
        }
    }

    /// Record a document with its assets.
    ///
    /// Content is the explicit `content` followed by the text of text-like
    /// files. Without content the document is stored as `assets_uploaded`.
    #[instrument(skip(self, request), fields(title = %request.title, files = request.files.len()))]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(AppError::MissingField {
                field: "title".to_string(),
            });
        }

        let status = match non_blank(request.status.as_deref()) {
            Some(raw) => raw.parse::<DocumentStatus>()?,
            None => DocumentStatus::default(),
        };

        let mut parts: Vec<String> = non_blank(request.content.as_deref()).into_iter().collect();
        let mut assets = Vec::with_capacity(request.files.len());

        for file in request.files {
            if file.url.trim().is_empty() {
                return Err(AppError::validation(
                    "files.url",
                    format!("file '{}' has no url", file.file_name),
                ));
            }
            if has_text_extension(&file.file_name, &self.config.ingestion.text_extensions) {
                if let Some(text) = non_blank(file.text.as_deref()) {
                    parts.push(text);
                }
            }
            assets.push(NewAsset {
                file_name: file.file_name,
                url: file.url,
                mime_type: file.mime_type,
                size_bytes: file.size_bytes,
            });
        }

        let content = if parts.is_empty() { None } else { Some(parts.join("\n")) };
        let ingest_status = if content.is_some() {
            IngestStatus::Queued
        } else {
            IngestStatus::AssetsUploaded
        };
        let asset_count = assets.len();

        let document = self
            .catalog
            .create_document(
                NewDocument {
                    title: title.to_string(),
                    content,
                    source: non_blank(request.source.as_deref()),
                    status,
                    ingest_status,
                },
                assets,
            )
            .await?;

        info!(
            doc_id = %document.doc_id,
            asset_count,
            ingest_status = ingest_status.as_str(),
            "Document ingested"
        );

        Ok(IngestResponse {
            document_id: document.doc_id,
            asset_count,
            ingest_status,
        })
    }

    /// Chunk and embed a stored document, replacing its previous chunks.
    ///
    /// Chunks are embedded concurrently and inserted one by one. Failed chunks
    /// are reported rather than rolled back; if nothing could be written the
    /// first failure is returned instead.
    #[instrument(skip(self, options, cancel), fields(doc_id = %doc_id))]
    pub async fn embed(&self, doc_id: Uuid, options: EmbedOptions, cancel: &CancelToken) -> Result<EmbedReport> {
        let start = Instant::now();
        let chunking = &self.config.chunking;

        let document = self
            .catalog
            .find_document(doc_id)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: doc_id.to_string() })?;

        let content = document.embeddable_content().ok_or_else(|| {
            AppError::validation("content", "document has no text content to embed; ingest text first")
        })?;

        let chunk_size = options.chunk_size.unwrap_or(chunking.chunk_size);
        if chunk_size < chunking.min_chunk_size {
            return Err(AppError::validation(
                "chunkSize",
                format!("chunk size must be at least {}", chunking.min_chunk_size),
            ));
        }
        let overlap = options.chunk_overlap.unwrap_or(chunking.chunk_overlap);
        let chunker = Chunker::new(chunk_size, overlap, chunking.boundary_tolerance)?;

        let model = options
            .embedding_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.embedder.model_name())
            .to_string();
        let dimension = self.embedder.dimension_for(&model);

        if let Some(corpus) = self.store.corpus_model(Some(doc_id)).await? {
            if corpus.model != model || corpus.dimension != dimension {
                return Err(AppError::ModelMismatch {
                    expected: format!("{} ({})", corpus.model, corpus.dimension),
                    actual: format!("{} ({})", model, dimension),
                });
            }
        }

        let (blank, chunks): (Vec<TextChunk>, Vec<TextChunk>) =
            chunker.chunk(content).into_iter().partition(TextChunk::is_blank);
        if chunks.is_empty() {
            return Err(AppError::validation("content", "document content produced no chunks"));
        }
        if !blank.is_empty() {
            debug!(doc_id = %doc_id, skipped = blank.len(), "Skipping whitespace-only chunks");
        }
        let total = chunks.len();

        let removed = self.store.delete_document_chunks(doc_id).await?;
        if removed > 0 {
            info!(doc_id = %doc_id, removed, "Removed previous chunks");
        }

        let title = Some(document.title.clone());
        let source = document.source.clone();
        let active = document.document_status() == DocumentStatus::Active;

        let outcomes: Vec<(i32, Result<()>)> = stream::iter(chunks)
            .map(|chunk| {
                let model = model.as_str();
                let title = title.clone();
                let source = source.clone();
                async move {
                    let index = chunk.index;
                    let outcome = async {
                        let embedding = self.embedder.embed(&chunk.content, Some(model), cancel).await?;
                        self.store
                            .insert(NewChunk {
                                doc_id,
                                chunk_index: chunk.index,
                                content: chunk.content,
                                token_count: chunk.token_count,
                                embedding: embedding.vector,
                                embedding_model: embedding.model,
                                title,
                                source,
                                document_active: active,
                            })
                            .await
                            .map(|_| ())
                    }
                    .await;
                    (index, outcome)
                }
            })
            .buffer_unordered(self.config.ingestion.max_concurrency.max(1))
            .collect()
            .await;

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled {
                operation: "document embedding".to_string(),
            });
        }

        let mut failed_chunks = Vec::new();
        let mut first_error = None;
        for (index, outcome) in outcomes {
            if let Err(e) = outcome {
                warn!(doc_id = %doc_id, chunk_index = index, error = %e, "Chunk embedding failed");
                failed_chunks.push(index);
                first_error.get_or_insert(e);
            }
        }
        failed_chunks.sort_unstable();

        let written = total - failed_chunks.len();
        metrics::record_chunks(written, failed_chunks.len());

        if written == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        if failed_chunks.is_empty() {
            self.catalog.set_ingest_status(doc_id, IngestStatus::Embedded).await?;
        }

        info!(
            doc_id = %doc_id,
            chunk_count = written,
            failed = failed_chunks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document embedded"
        );

        Ok(EmbedReport {
            chunk_count: written,
            failed: !failed_chunks.is_empty(),
            failed_chunks,
        })
    }
}
