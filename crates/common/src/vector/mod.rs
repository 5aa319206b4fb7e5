//! Vector storage and nearest-neighbour search
//!
//! Distances are cosine distances `d = 1 - cos(a, b)` in [0, 2]. Results are
//! ordered by ascending distance with ties broken by insertion sequence.

mod memory;
mod pg;

pub use memory::MemoryVectorStore;
pub use pg::PgVectorStore;

use crate::errors::Result;
use crate::resilience::CancelToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Chunk to persist with its vector
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub doc_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    /// Document metadata carried for stores without a document join
    pub title: Option<String>,
    pub source: Option<String>,
    pub document_active: bool,
}

/// Persisted chunk without its vector
#[derive(Debug, Clone, Serialize)]
pub struct StoredChunk {
    pub chunk_id: Uuid,
    pub doc_id: Uuid,
    pub chunk_index: i32,
    pub content: String,
    pub token_count: i32,
    pub embedding_model: String,
    pub title: Option<String>,
    pub source: Option<String>,
    /// Insertion order, used to break distance ties
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

/// Search hit
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub distance: f64,
    pub similarity: f64,
}

impl ScoredChunk {
    pub fn new(chunk: StoredChunk, distance: f64) -> Self {
        Self {
            chunk,
            distance,
            similarity: similarity_from_distance(distance),
        }
    }
}

/// Restrictions applied before ranking; inactive documents are always excluded
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub sources: Option<Vec<String>>,
    pub document_ids: Option<Vec<Uuid>>,
}

impl SearchFilter {
    pub fn sources(sources: Vec<String>) -> Self {
        Self {
            sources: Some(sources),
            document_ids: None,
        }
    }

    /// Whether a chunk with this source and document passes the filter
    pub fn admits(&self, source: Option<&str>, doc_id: Uuid) -> bool {
        let source_ok = match &self.sources {
            Some(sources) => source.is_some_and(|s| sources.iter().any(|want| want == s)),
            None => true,
        };
        let doc_ok = match &self.document_ids {
            Some(ids) => ids.contains(&doc_id),
            None => true,
        };
        source_ok && doc_ok
    }
}

/// Model and dimensionality already present in a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusModel {
    pub model: String,
    pub dimension: usize,
}

/// One retrieval written to the audit trail
#[derive(Debug, Clone)]
pub struct RetrievalAudit {
    pub user_id: Option<Uuid>,
    pub query_text: String,
    pub query_embedding: Vec<f32>,
    /// Retained chunk ids with their similarity scores
    pub matches: Vec<(Uuid, f64)>,
}

/// Storage contract for chunk vectors
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist one chunk atomically.
    ///
    /// A chunk whose model or dimension differs from the corpus is rejected
    /// with `ModelMismatch`.
    async fn insert(&self, chunk: NewChunk) -> Result<StoredChunk>;

    /// At most `k` nearest chunks to `query` passing `filter`
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredChunk>>;

    /// Remove every chunk of a document, returning how many were removed
    async fn delete_document_chunks(&self, doc_id: Uuid) -> Result<u64>;

    /// Model of the chunks already stored, if any, ignoring those of `exclude`
    async fn corpus_model(&self, exclude: Option<Uuid>) -> Result<Option<CorpusModel>>;

    /// Append a query and its matches to the audit trail, returning the query id
    async fn record_retrieval(&self, audit: RetrievalAudit) -> Result<Uuid>;
}

/// Similarity in [0, 1] for a cosine distance in [0, 2]
pub fn similarity_from_distance(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Cosine distance; a zero vector sits at distance 1 from everything
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let cos = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    1.0 - cos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_monotonic_and_bounded() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(2.0), 0.0);
        assert_eq!(similarity_from_distance(3.0), 0.0);
        assert_eq!(similarity_from_distance(-0.5), 1.0);

        let distances: Vec<f64> = (0..=40).map(|i| i as f64 * 0.05).collect();
        for pair in distances.windows(2) {
            assert!(similarity_from_distance(pair[0]) > similarity_from_distance(pair[1]));
        }
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_filter_admits() {
        let doc = Uuid::new_v4();
        let any = SearchFilter::default();
        assert!(any.admits(None, doc));

        let faq = SearchFilter::sources(vec!["faq".to_string()]);
        assert!(faq.admits(Some("faq"), doc));
        assert!(!faq.admits(Some("blog"), doc));
        assert!(!faq.admits(None, doc));

        let pinned = SearchFilter {
            sources: None,
            document_ids: Some(vec![doc]),
        };
        assert!(pinned.admits(Some("blog"), doc));
        assert!(!pinned.admits(Some("blog"), Uuid::new_v4()));
    }
}
