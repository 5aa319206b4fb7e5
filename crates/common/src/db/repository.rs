//! Repository pattern for database operations
//!
//! Implements the document and routine seams over SeaORM. Chunk, query and
//! match rows carry pgvector columns and live in `vector::PgVectorStore`.

use super::catalog::{DocumentCatalog, NewAsset, NewDocument, RoutineDraftWriter, SavedRoutine};
use super::memory::routine_rows;
use crate::context::{Citation, RoutineDraft};
use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    /// Steps of a saved routine in order
    pub async fn routine_steps(&self, routine_id: Uuid) -> Result<Vec<RoutineStep>> {
        RoutineStepEntity::find()
            .filter(RoutineStepColumn::RoutineId.eq(routine_id))
            .order_by_asc(RoutineStepColumn::StepOrder)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl DocumentCatalog for Repository {
    #[instrument(skip(self, document, assets), fields(title = %document.title, assets = assets.len()))]
    async fn create_document(&self, document: NewDocument, assets: Vec<NewAsset>) -> Result<Document> {
        let now = Utc::now();
        let doc_id = Uuid::new_v4();
        let txn = self.write_conn().begin().await?;

        let created = DocumentActiveModel {
            doc_id: Set(doc_id),
            title: Set(document.title),
            content: Set(document.content),
            source: Set(document.source),
            status: Set(document.status.as_str().to_string()),
            ingest_status: Set(document.ingest_status.as_str().to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;

        for asset in assets {
            DocumentAssetActiveModel {
                asset_id: Set(Uuid::new_v4()),
                doc_id: Set(doc_id),
                file_name: Set(asset.file_name),
                url: Set(asset.url),
                mime_type: Set(asset.mime_type),
                size_bytes: Set(asset.size_bytes),
                created_at: Set(now.into()),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        Ok(created)
    }

    async fn find_document(&self, doc_id: Uuid) -> Result<Option<Document>> {
        DocumentEntity::find_by_id(doc_id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn set_ingest_status(&self, doc_id: Uuid, status: IngestStatus) -> Result<()> {
        let mut doc: DocumentActiveModel = DocumentEntity::find_by_id(doc_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::DocumentNotFound { id: doc_id.to_string() })?
            .into();

        doc.ingest_status = Set(status.as_str().to_string());
        doc.updated_at = Set(Utc::now().into());
        doc.update(self.write_conn()).await?;
        Ok(())
    }

    async fn asset_urls(&self, doc_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        if doc_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let assets = DocumentAssetEntity::find()
            .filter(DocumentAssetColumn::DocId.is_in(doc_ids.iter().copied()))
            .order_by_asc(DocumentAssetColumn::CreatedAt)
            .all(self.read_conn())
            .await?;

        let mut urls: HashMap<Uuid, Vec<String>> = HashMap::new();
        for asset in assets {
            urls.entry(asset.doc_id).or_default().push(asset.url);
        }
        Ok(urls)
    }
}

#[async_trait]
impl RoutineDraftWriter for Repository {
    #[instrument(skip(self, draft, citations), fields(steps = draft.steps.len(), citations = citations.len()))]
    async fn save_draft(
        &self,
        owner_id: Option<Uuid>,
        draft: &RoutineDraft,
        citations: &[Citation],
    ) -> Result<Uuid> {
        let rows = routine_rows(owner_id, draft, citations);
        let routine_id = rows.routine.routine_id;
        let txn = self.write_conn().begin().await?;

        RoutineActiveModel::from(rows.routine).reset_all().insert(&txn).await?;
        for step in rows.steps {
            RoutineStepActiveModel::from(step).reset_all().insert(&txn).await?;
        }
        for citation in rows.citations {
            RoutineCitationActiveModel::from(citation).reset_all().insert(&txn).await?;
        }

        txn.commit().await.map_err(|e| AppError::Persistence {
            message: format!("failed to commit routine draft: {}", e),
        })?;
        Ok(routine_id)
    }

    async fn set_status(&self, routine_id: Uuid, status: RoutineStatus) -> Result<SavedRoutine> {
        let mut routine: RoutineActiveModel = RoutineEntity::find_by_id(routine_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::RoutineNotFound { id: routine_id.to_string() })?
            .into();

        let now = Utc::now();
        routine.status = Set(status.as_str().to_string());
        routine.updated_at = Set(now.into());
        routine.update(self.write_conn()).await?;

        Ok(SavedRoutine {
            routine_id,
            status,
            updated_at: now,
        })
    }
}
