//! Storage seams for documents and routine drafts

use crate::context::{Citation, RoutineDraft};
use crate::db::models::{Document, DocumentStatus, IngestStatus, RoutineStatus};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Document row to create
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub content: Option<String>,
    pub source: Option<String>,
    pub status: DocumentStatus,
    pub ingest_status: IngestStatus,
}

/// Asset row to attach to a new document
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub file_name: String,
    pub url: String,
    pub mime_type: Option<String>,
    pub size_bytes: Option<i64>,
}

/// Routine header after a status change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRoutine {
    pub routine_id: Uuid,
    pub status: RoutineStatus,
    pub updated_at: DateTime<Utc>,
}

/// Document and asset persistence
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    /// Create a document and its assets in one unit
    async fn create_document(&self, document: NewDocument, assets: Vec<NewAsset>) -> Result<Document>;

    async fn find_document(&self, doc_id: Uuid) -> Result<Option<Document>>;

    async fn set_ingest_status(&self, doc_id: Uuid, status: IngestStatus) -> Result<()>;

    /// Asset URLs per document, in creation order
    async fn asset_urls(&self, doc_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>>;
}

/// Routine persistence for generated drafts
#[async_trait]
pub trait RoutineDraftWriter: Send + Sync {
    /// Persist a draft with its steps and citations, returning the routine id
    async fn save_draft(
        &self,
        owner_id: Option<Uuid>,
        draft: &RoutineDraft,
        citations: &[Citation],
    ) -> Result<Uuid>;

    /// Move a routine to `status`; unknown ids are `RoutineNotFound`
    async fn set_status(&self, routine_id: Uuid, status: RoutineStatus) -> Result<SavedRoutine>;
}
