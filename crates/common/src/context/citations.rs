//! Citation tracking for grounded generations

use crate::vector::ScoredChunk;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chunk that grounded a generated routine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub doc_id: Uuid,
    pub chunk_id: Uuid,
    /// Similarity of the chunk to the query
    pub score: f64,
}

impl From<&ScoredChunk> for Citation {
    fn from(chunk: &ScoredChunk) -> Self {
        Self {
            doc_id: chunk.chunk.doc_id,
            chunk_id: chunk.chunk.chunk_id,
            score: chunk.similarity,
        }
    }
}

/// Records which retained chunks made it into the prompt
pub struct CitationTracker;

impl CitationTracker {
    /// One citation per chunk included in the prompt, in prompt order.
    ///
    /// Fallback prompts include no chunks, so they yield no citations.
    pub fn track(used: &[ScoredChunk]) -> Vec<Citation> {
        used.iter().map(Citation::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::StoredChunk;
    use chrono::Utc;

    fn scored(distance: f64) -> ScoredChunk {
        ScoredChunk::new(
            StoredChunk {
                chunk_id: Uuid::new_v4(),
                doc_id: Uuid::new_v4(),
                chunk_index: 0,
                content: "Azelaic acid reduces redness.".to_string(),
                token_count: 7,
                embedding_model: "text-embedding-3-small".to_string(),
                title: None,
                source: None,
                seq: 1,
                created_at: Utc::now(),
            },
            distance,
        )
    }

    #[test]
    fn test_tracks_used_chunks_in_order() {
        let used = vec![scored(0.2), scored(0.6)];
        let citations = CitationTracker::track(&used);

        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].chunk_id, used[0].chunk.chunk_id);
        assert_eq!(citations[1].doc_id, used[1].chunk.doc_id);
        assert!((citations[0].score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_has_no_citations() {
        assert!(CitationTracker::track(&[]).is_empty());
    }
}
