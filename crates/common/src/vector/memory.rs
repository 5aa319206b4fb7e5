//! In-process vector store

use super::{
    cosine_distance, CorpusModel, NewChunk, RetrievalAudit, ScoredChunk, SearchFilter, StoredChunk,
    VectorStore,
};
use crate::errors::{AppError, Result};
use crate::resilience::CancelToken;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Entry {
    chunk: StoredChunk,
    vector: Vec<f32>,
    active: bool,
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    next_seq: i64,
    audits: Vec<(Uuid, RetrievalAudit)>,
}

/// Exhaustive-scan store guarded by a read-write lock
#[derive(Default)]
pub struct MemoryVectorStore {
    state: RwLock<State>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Audit rows written so far
    pub async fn audits(&self) -> Vec<RetrievalAudit> {
        self.state
            .read()
            .await
            .audits
            .iter()
            .map(|(_, audit)| audit.clone())
            .collect()
    }
}

fn corpus_of(entries: &[Entry], exclude: Option<Uuid>) -> Option<CorpusModel> {
    entries.iter().find(|e| Some(e.chunk.doc_id) != exclude).map(|e| CorpusModel {
        model: e.chunk.embedding_model.clone(),
        dimension: e.vector.len(),
    })
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn insert(&self, chunk: NewChunk) -> Result<StoredChunk> {
        let mut state = self.state.write().await;

        if let Some(corpus) = corpus_of(&state.entries, None) {
            if corpus.model != chunk.embedding_model || corpus.dimension != chunk.embedding.len() {
                return Err(AppError::ModelMismatch {
                    expected: format!("{} ({})", corpus.model, corpus.dimension),
                    actual: format!("{} ({})", chunk.embedding_model, chunk.embedding.len()),
                });
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let stored = StoredChunk {
            chunk_id: Uuid::new_v4(),
            doc_id: chunk.doc_id,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            token_count: chunk.token_count,
            embedding_model: chunk.embedding_model,
            title: chunk.title,
            source: chunk.source,
            seq,
            created_at: Utc::now(),
        };

        state.entries.push(Entry {
            chunk: stored.clone(),
            vector: chunk.embedding,
            active: chunk.document_active,
        });

        Ok(stored)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredChunk>> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled {
                operation: "vector search".to_string(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        if let Some(corpus) = corpus_of(&state.entries, None) {
            if corpus.dimension != query.len() {
                return Err(AppError::ModelMismatch {
                    expected: format!("dimension {}", corpus.dimension),
                    actual: format!("dimension {}", query.len()),
                });
            }
        }

        let mut hits: Vec<ScoredChunk> = state
            .entries
            .iter()
            .filter(|e| e.active && filter.admits(e.chunk.source.as_deref(), e.chunk.doc_id))
            .map(|e| ScoredChunk::new(e.chunk.clone(), cosine_distance(query, &e.vector)))
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.chunk.seq.cmp(&b.chunk.seq))
        });
        hits.truncate(k);

        Ok(hits)
    }

    async fn delete_document_chunks(&self, doc_id: Uuid) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|e| e.chunk.doc_id != doc_id);
        Ok((before - state.entries.len()) as u64)
    }

    async fn corpus_model(&self, exclude: Option<Uuid>) -> Result<Option<CorpusModel>> {
        Ok(corpus_of(&self.state.read().await.entries, exclude))
    }

    async fn record_retrieval(&self, audit: RetrievalAudit) -> Result<Uuid> {
        let query_id = Uuid::new_v4();
        self.state.write().await.audits.push((query_id, audit));
        Ok(query_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc_id: Uuid, index: i32, vector: Vec<f32>, source: &str) -> NewChunk {
        NewChunk {
            doc_id,
            chunk_index: index,
            content: format!("chunk {}", index),
            token_count: 2,
            embedding: vector,
            embedding_model: "test-model".to_string(),
            title: Some("Doc".to_string()),
            source: Some(source.to_string()),
            document_active: true,
        }
    }

    #[tokio::test]
    async fn test_search_orders_by_distance_then_insertion() {
        let store = MemoryVectorStore::new();
        let doc = Uuid::new_v4();
        store.insert(chunk(doc, 0, vec![0.0, 1.0], "faq")).await.unwrap();
        store.insert(chunk(doc, 1, vec![1.0, 0.0], "faq")).await.unwrap();
        store.insert(chunk(doc, 2, vec![2.0, 0.0], "faq")).await.unwrap();
        store.insert(chunk(doc, 3, vec![1.0, 1.0], "faq")).await.unwrap();

        let hits = store
            .search(&[1.0, 0.0], 10, &SearchFilter::default(), &CancelToken::new())
            .await
            .unwrap();

        let order: Vec<i32> = hits.iter().map(|h| h.chunk.chunk_index).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
        assert!(hits[0].similarity > hits[2].similarity);
        assert_eq!(hits[0].similarity, 1.0);

        // Repeated searches give the same order
        let again = store
            .search(&[1.0, 0.0], 10, &SearchFilter::default(), &CancelToken::new())
            .await
            .unwrap();
        let order_again: Vec<i32> = again.iter().map(|h| h.chunk.chunk_index).collect();
        assert_eq!(order, order_again);
    }

    #[tokio::test]
    async fn test_search_respects_k_and_filters() {
        let store = MemoryVectorStore::new();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        store.insert(chunk(doc_a, 0, vec![1.0, 0.0], "faq")).await.unwrap();
        store.insert(chunk(doc_b, 0, vec![1.0, 0.1], "blog")).await.unwrap();
        let mut inactive = chunk(doc_b, 1, vec![1.0, 0.0], "faq");
        inactive.document_active = false;
        store.insert(inactive).await.unwrap();

        let cancel = CancelToken::new();
        let all = store.search(&[1.0, 0.0], 1, &SearchFilter::default(), &cancel).await.unwrap();
        assert_eq!(all.len(), 1);

        let faq = store
            .search(&[1.0, 0.0], 10, &SearchFilter::sources(vec!["faq".to_string()]), &cancel)
            .await
            .unwrap();
        assert_eq!(faq.len(), 1);
        assert_eq!(faq[0].chunk.doc_id, doc_a);

        let pinned = SearchFilter {
            sources: None,
            document_ids: Some(vec![doc_b]),
        };
        let hits = store.search(&[1.0, 0.0], 10, &pinned, &cancel).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source.as_deref(), Some("blog"));
    }

    #[tokio::test]
    async fn test_insert_rejects_mixed_models() {
        let store = MemoryVectorStore::new();
        let doc = Uuid::new_v4();
        store.insert(chunk(doc, 0, vec![1.0, 0.0], "faq")).await.unwrap();

        let mut other_model = chunk(doc, 1, vec![1.0, 0.0], "faq");
        other_model.embedding_model = "other".to_string();
        assert!(matches!(
            store.insert(other_model).await,
            Err(AppError::ModelMismatch { .. })
        ));

        let wrong_dim = chunk(doc, 2, vec![1.0, 0.0, 0.0], "faq");
        assert!(matches!(store.insert(wrong_dim).await, Err(AppError::ModelMismatch { .. })));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_inserts_agree_on_model() {
        let store = std::sync::Arc::new(MemoryVectorStore::new());
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut new = chunk(Uuid::new_v4(), 0, vec![1.0, 0.0], "faq");
                    new.embedding_model = if i % 2 == 0 { "model-a" } else { "model-b" }.to_string();
                    store.insert(new).await
                })
            })
            .collect();

        let mut stored = Vec::new();
        for task in tasks {
            if let Ok(chunk) = task.await.unwrap() {
                stored.push(chunk.embedding_model);
            }
        }
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|m| *m == stored[0]));
        let corpus = store.corpus_model(None).await.unwrap().unwrap();
        assert_eq!(corpus.model, stored[0]);
    }

    #[tokio::test]
    async fn test_delete_and_corpus_model() {
        let store = MemoryVectorStore::new();
        assert!(store.corpus_model(None).await.unwrap().is_none());

        let doc = Uuid::new_v4();
        store.insert(chunk(doc, 0, vec![1.0, 0.0], "faq")).await.unwrap();
        store.insert(chunk(doc, 1, vec![0.0, 1.0], "faq")).await.unwrap();
        assert_eq!(
            store.corpus_model(None).await.unwrap(),
            Some(CorpusModel {
                model: "test-model".to_string(),
                dimension: 2
            })
        );
        assert!(store.corpus_model(Some(doc)).await.unwrap().is_none());

        assert_eq!(store.delete_document_chunks(doc).await.unwrap(), 2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_search() {
        let store = MemoryVectorStore::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = store.search(&[1.0], 3, &SearchFilter::default(), &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled { .. })));
    }
}
