//! PostgreSQL/pgvector store
//!
//! Chunks live in `document_chunks` and are joined to `medical_documents` for
//! status, source and title. Ties on `embedding <=> $1` fall back to `seq`.

use super::{
    CorpusModel, NewChunk, RetrievalAudit, ScoredChunk, SearchFilter, StoredChunk, VectorStore,
};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::resilience::CancelToken;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

const SEARCH_SQL: &str = r#"
    SELECT
        c.chunk_id,
        c.doc_id,
        c.chunk_index,
        c.content,
        c.token_count,
        c.embedding_model,
        c.seq,
        c.created_at,
        d.title,
        d.source,
        (c.embedding <=> $1) AS distance
    FROM document_chunks c
    JOIN medical_documents d ON d.doc_id = c.doc_id
    WHERE d.status = 'active'
      AND ($2::text[] IS NULL OR d.source = ANY($2))
      AND ($3::uuid[] IS NULL OR c.doc_id = ANY($3))
    ORDER BY distance ASC, c.seq ASC
    LIMIT $4
"#;

const CORPUS_MODEL_SQL: &str = r#"
    SELECT embedding_model, vector_dims(embedding) AS dims
    FROM document_chunks
    WHERE ($1::uuid IS NULL OR doc_id <> $1)
    ORDER BY seq
    LIMIT 1
"#;

/// Advisory lock key held by chunk writers for the length of one insert
const CORPUS_WRITE_LOCK: i64 = 0x736b_696e_6361_7265;

fn corpus_from_row(row: &PgRow) -> Result<CorpusModel> {
    let dims: i32 = row.try_get("dims")?;
    Ok(CorpusModel {
        model: row.try_get("embedding_model")?,
        dimension: dims as usize,
    })
}

/// pgvector-backed store sharing the SeaORM connection pool
#[derive(Clone)]
pub struct PgVectorStore {
    pool: DbPool,
}

impl PgVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn scored_from_row(row: &PgRow) -> Result<ScoredChunk> {
        let chunk = StoredChunk {
            chunk_id: row.try_get("chunk_id")?,
            doc_id: row.try_get("doc_id")?,
            chunk_index: row.try_get("chunk_index")?,
            content: row.try_get("content")?,
            token_count: row.try_get("token_count")?,
            embedding_model: row.try_get("embedding_model")?,
            title: row.try_get("title")?,
            source: row.try_get("source")?,
            seq: row.try_get("seq")?,
            created_at: row.try_get("created_at")?,
        };
        let distance: f64 = row.try_get("distance")?;
        Ok(ScoredChunk::new(chunk, distance))
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    #[instrument(skip(self, chunk), fields(doc_id = %chunk.doc_id, chunk_index = chunk.chunk_index))]
    async fn insert(&self, chunk: NewChunk) -> Result<StoredChunk> {
        let mut tx = self.pool.pg_pool().begin().await?;

        // Serializes writers so two first embeds cannot seed different models
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(CORPUS_WRITE_LOCK)
            .execute(&mut *tx)
            .await?;

        let corpus = sqlx::query(CORPUS_MODEL_SQL)
            .bind(Option::<Uuid>::None)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| corpus_from_row(&row))
            .transpose()?;
        if let Some(corpus) = corpus {
            if corpus.model != chunk.embedding_model || corpus.dimension != chunk.embedding.len() {
                return Err(AppError::ModelMismatch {
                    expected: format!("{} ({})", corpus.model, corpus.dimension),
                    actual: format!("{} ({})", chunk.embedding_model, chunk.embedding.len()),
                });
            }
        }

        let chunk_id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO document_chunks (
                chunk_id, doc_id, chunk_index, content, embedding,
                embedding_model, token_count, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING seq, created_at
            "#,
        )
        .bind(chunk_id)
        .bind(chunk.doc_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.content)
        .bind(Vector::from(chunk.embedding))
        .bind(&chunk.embedding_model)
        .bind(chunk.token_count)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let seq: i64 = row.try_get("seq")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        Ok(StoredChunk {
            chunk_id,
            doc_id: chunk.doc_id,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            token_count: chunk.token_count,
            embedding_model: chunk.embedding_model,
            title: chunk.title,
            source: chunk.source,
            seq,
            created_at,
        })
    }

    #[instrument(skip(self, query, filter, cancel), fields(k = k))]
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let fetch = sqlx::query(SEARCH_SQL)
            .bind(Vector::from(query.to_vec()))
            .bind(filter.sources.clone())
            .bind(filter.document_ids.clone())
            .bind(k as i64)
            .fetch_all(self.pool.pg_read_pool());

        let rows = cancel.guard("vector search", fetch).await??;
        debug!(rows = rows.len(), "Vector search complete");

        rows.iter().map(Self::scored_from_row).collect()
    }

    async fn delete_document_chunks(&self, doc_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE doc_id = $1")
            .bind(doc_id)
            .execute(self.pool.pg_pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn corpus_model(&self, exclude: Option<Uuid>) -> Result<Option<CorpusModel>> {
        sqlx::query(CORPUS_MODEL_SQL)
            .bind(exclude)
            .fetch_optional(self.pool.pg_read_pool())
            .await?
            .map(|row| corpus_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self, audit), fields(matches = audit.matches.len()))]
    async fn record_retrieval(&self, audit: RetrievalAudit) -> Result<Uuid> {
        let query_id = Uuid::new_v4();
        let mut tx = self.pool.pg_pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_queries (query_id, user_id, query_text, embedding, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(query_id)
        .bind(audit.user_id)
        .bind(&audit.query_text)
        .bind(Vector::from(audit.query_embedding))
        .execute(&mut *tx)
        .await?;

        for (chunk_id, score) in &audit.matches {
            sqlx::query(
                r#"
                INSERT INTO query_matches (match_id, query_id, chunk_id, similarity_score, created_at)
                VALUES ($1, $2, $3, $4, NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(query_id)
            .bind(*chunk_id)
            .bind(*score)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(query_id)
    }
}

#[cfg(test)]
mod tests {
    const SCHEMA: &str = include_str!("../../../../migrations/0001_init.sql");

    fn table(name: &str) -> &'static str {
        let start = SCHEMA
            .find(&format!("CREATE TABLE IF NOT EXISTS {} (", name))
            .unwrap();
        let len = SCHEMA[start..].find(");").unwrap();
        &SCHEMA[start..start + len]
    }

    #[test]
    fn test_query_matches_survive_chunk_replacement() {
        let matches = table("query_matches");
        assert!(matches.contains("chunk_id UUID NOT NULL"));
        assert!(!matches.contains("REFERENCES document_chunks"));
        assert!(matches.contains("REFERENCES user_queries"));
    }

    #[test]
    fn test_corpus_model_sql_excludes_document() {
        assert!(super::CORPUS_MODEL_SQL.contains("doc_id <> $1"));
        assert!(table("document_chunks").contains("embedding_model"));
    }
}
