//! Query-time retrieval
//!
//! `retrieve` feeds routine generation: it over-fetches, applies the
//! similarity threshold and decides whether the grounded path is viable.
//! `search` is the plain ranked lookup behind the search endpoint.

use crate::config::AppConfig;
use crate::db::DocumentCatalog;
use crate::embeddings::Embedder;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::resilience::CancelToken;
use crate::services::RagServices;
use crate::vector::{RetrievalAudit, ScoredChunk, SearchFilter, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Parameters of one threshold-filtered retrieval
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub k: usize,
    pub filter: SearchFilter,
    pub min_similarity: f64,
    pub embedding_model: Option<String>,
    pub user_id: Option<Uuid>,
}

/// Chunks that cleared the threshold, best first
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub retained: Vec<ScoredChunk>,
    /// Whether at least one chunk cleared the threshold
    pub sufficient: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
    pub source_filter: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub doc_id: Uuid,
    pub title: Option<String>,
    pub source: Option<String>,
    pub content: String,
    pub distance: f64,
    pub similarity: f64,
    pub asset_urls: Vec<String>,
}

pub struct Retriever {
    config: Arc<AppConfig>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    catalog: Arc<dyn DocumentCatalog>,
}

impl Retriever {
    pub fn new(services: &RagServices) -> Self {
        Self {
            config: services.config.clone(),
            embedder: services.embedder.clone(),
            store: services.store.clone(),
            catalog: services.catalog.clone(),
        }
    }

    /// Distances are only meaningful in the corpus' embedding space
    async fn ensure_corpus_model(&self, model: &str) -> Result<()> {
        if let Some(corpus) = self.store.corpus_model(None).await? {
            let dimension = self.embedder.dimension_for(model);
            if corpus.model != model || corpus.dimension != dimension {
                return Err(AppError::ModelMismatch {
                    expected: format!("{} ({})", corpus.model, corpus.dimension),
                    actual: format!("{} ({})", model, dimension),
                });
            }
        }
        Ok(())
    }

    /// Clamp a requested k into [1, max_k]
    pub fn clamp_k(&self, k: usize) -> usize {
        k.clamp(1, self.config.rag.max_k.max(1))
    }

    /// Embed the query, over-fetch `2k` and keep those at or above the threshold.
    ///
    /// An empty result is not an error; it selects the fallback path.
    #[instrument(skip(self, query, cancel), fields(k = query.k, min_similarity = query.min_similarity))]
    pub async fn retrieve(&self, query: RetrievalQuery, cancel: &CancelToken) -> Result<Retrieval> {
        let start = Instant::now();
        let text = query.text.trim();
        if text.is_empty() {
            return Err(AppError::validation("query", "query cannot be empty"));
        }

        let k = self.clamp_k(query.k);
        let model = query
            .embedding_model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.embedder.model_name())
            .to_string();
        self.ensure_corpus_model(&model).await?;

        let embedding = self.embedder.embed(text, Some(&model), cancel).await?;

        let candidates = self
            .store
            .search(&embedding.vector, k * 2, &query.filter, cancel)
            .await?;
        let fetched = candidates.len();

        let mut retained: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter(|c| c.similarity >= query.min_similarity)
            .collect();
        retained.truncate(k);
        let sufficient = !retained.is_empty();

        debug!(fetched, retained = retained.len(), sufficient, "Retrieval filtered");

        let audit = RetrievalAudit {
            user_id: query.user_id,
            query_text: text.to_string(),
            query_embedding: embedding.vector,
            matches: retained
                .iter()
                .map(|c| (c.chunk.chunk_id, c.similarity))
                .collect(),
        };
        if let Err(e) = self.store.record_retrieval(audit).await {
            warn!(error = %e, "Failed to record retrieval audit");
        }

        metrics::record_retrieval(start.elapsed().as_secs_f64(), retained.len(), sufficient);

        Ok(Retrieval { retained, sufficient })
    }

    /// Ranked lookup without a threshold; sources default to the configured list
    #[instrument(skip(self, request, cancel), fields(top_k = ?request.top_k))]
    pub async fn search(&self, request: SearchRequest, cancel: &CancelToken) -> Result<Vec<SearchHit>> {
        let text = request.query.trim();
        if text.is_empty() {
            return Err(AppError::validation("query", "query cannot be empty"));
        }

        let k = self.clamp_k(request.top_k.unwrap_or(self.config.rag.search_top_k));
        let sources = request
            .source_filter
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.rag.default_sources.clone());
        let filter = SearchFilter::sources(sources);

        self.ensure_corpus_model(self.embedder.model_name()).await?;
        let embedding = self.embedder.embed(text, None, cancel).await?;
        let hits = self.store.search(&embedding.vector, k, &filter, cancel).await?;

        let mut doc_ids: Vec<Uuid> = hits.iter().map(|h| h.chunk.doc_id).collect();
        doc_ids.sort();
        doc_ids.dedup();
        let assets = self.catalog.asset_urls(&doc_ids).await?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                asset_urls: assets.get(&hit.chunk.doc_id).cloned().unwrap_or_default(),
                chunk_id: hit.chunk.chunk_id,
                doc_id: hit.chunk.doc_id,
                title: hit.chunk.title,
                source: hit.chunk.source,
                content: hit.chunk.content,
                distance: hit.distance,
                similarity: hit.similarity,
            })
            .collect())
    }
}
