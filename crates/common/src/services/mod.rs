//! Dependency container shared by the binaries
//!
//! Built once in `main` and handed to handlers through axum `State`.

use crate::config::AppConfig;
use crate::context::{create_llm_client, LlmClient};
use crate::db::{
    DbPool, DocumentCatalog, MemoryCatalog, MemoryRoutineWriter, Repository, RoutineDraftWriter,
};
use crate::embeddings::{create_embedder, Embedder};
use crate::errors::Result;
use crate::ingest::IngestService;
use crate::resilience::ProviderPermits;
use crate::retrieval::Retriever;
use crate::routine::RoutineService;
use crate::vector::{MemoryVectorStore, PgVectorStore, VectorStore};
use std::sync::Arc;
use tracing::info;

/// Everything the pipeline talks to
#[derive(Clone)]
pub struct RagServices {
    pub config: Arc<AppConfig>,
    pub permits: ProviderPermits,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn LlmClient>,
    pub store: Arc<dyn VectorStore>,
    pub catalog: Arc<dyn DocumentCatalog>,
    pub writer: Arc<dyn RoutineDraftWriter>,
}

impl RagServices {
    /// Build providers from configuration; storage is PostgreSQL when `db` is given
    pub fn from_config(config: AppConfig, db: Option<DbPool>) -> Result<Self> {
        let permits = ProviderPermits::new(config.embedding.max_concurrency);
        let embedder = create_embedder(&config.embedding, permits.clone())?;
        let llm = create_llm_client(&config.llm, permits.clone())?;

        let (store, catalog, writer): (
            Arc<dyn VectorStore>,
            Arc<dyn DocumentCatalog>,
            Arc<dyn RoutineDraftWriter>,
        ) = match db {
            Some(pool) => {
                info!("Using PostgreSQL storage");
                let repo = Repository::new(pool.clone());
                (
                    Arc::new(PgVectorStore::new(pool)),
                    Arc::new(repo.clone()),
                    Arc::new(repo),
                )
            }
            None => {
                info!("No database configured, using in-memory storage");
                (
                    Arc::new(MemoryVectorStore::new()),
                    Arc::new(MemoryCatalog::new()),
                    Arc::new(MemoryRoutineWriter::new()),
                )
            }
        };

        Ok(Self {
            config: Arc::new(config),
            permits,
            embedder,
            llm,
            store,
            catalog,
            writer,
        })
    }

    /// In-memory storage around the given providers
    pub fn in_memory(config: AppConfig, embedder: Arc<dyn Embedder>, llm: Arc<dyn LlmClient>) -> Self {
        let permits = ProviderPermits::new(config.embedding.max_concurrency);
        Self {
            config: Arc::new(config),
            permits,
            embedder,
            llm,
            store: Arc::new(MemoryVectorStore::new()),
            catalog: Arc::new(MemoryCatalog::new()),
            writer: Arc::new(MemoryRoutineWriter::new()),
        }
    }

    pub fn ingest(&self) -> IngestService {
        IngestService::new(self)
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(self)
    }

    pub fn routines(&self) -> RoutineService {
        RoutineService::new(self)
    }
}
