//! In-memory catalog and routine writer for offline runs and tests

use super::catalog::{DocumentCatalog, NewAsset, NewDocument, RoutineDraftWriter, SavedRoutine};
use crate::context::{Citation, RoutineDraft};
use crate::db::models::{
    Document, DocumentAsset, IngestStatus, Routine, RoutineCitation, RoutineStatus, RoutineStep,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct CatalogState {
    documents: HashMap<Uuid, Document>,
    assets: Vec<DocumentAsset>,
}

/// Document catalog held in process memory
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentCatalog for MemoryCatalog {
    async fn create_document(&self, document: NewDocument, assets: Vec<NewAsset>) -> Result<Document> {
        let now = Utc::now();
        let doc = Document {
            doc_id: Uuid::new_v4(),
            title: document.title,
            content: document.content,
            source: document.source,
            status: document.status.as_str().to_string(),
            ingest_status: document.ingest_status.as_str().to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };

        let mut state = self.state.write().await;
        for asset in assets {
            state.assets.push(DocumentAsset {
                asset_id: Uuid::new_v4(),
                doc_id: doc.doc_id,
                file_name: asset.file_name,
                url: asset.url,
                mime_type: asset.mime_type,
                size_bytes: asset.size_bytes,
                created_at: now.into(),
            });
        }
        state.documents.insert(doc.doc_id, doc.clone());

        Ok(doc)
    }

    async fn find_document(&self, doc_id: Uuid) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(&doc_id).cloned())
    }

    async fn set_ingest_status(&self, doc_id: Uuid, status: IngestStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let doc = state
            .documents
            .get_mut(&doc_id)
            .ok_or_else(|| AppError::DocumentNotFound { id: doc_id.to_string() })?;
        doc.ingest_status = status.as_str().to_string();
        doc.updated_at = Utc::now().into();
        Ok(())
    }

    async fn asset_urls(&self, doc_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<String>>> {
        let state = self.state.read().await;
        let mut urls: HashMap<Uuid, Vec<String>> = HashMap::new();
        for asset in state.assets.iter().filter(|a| doc_ids.contains(&a.doc_id)) {
            urls.entry(asset.doc_id).or_default().push(asset.url.clone());
        }
        Ok(urls)
    }
}

/// A saved routine with its rows
#[derive(Debug, Clone)]
pub struct StoredRoutine {
    pub routine: Routine,
    pub steps: Vec<RoutineStep>,
    pub citations: Vec<RoutineCitation>,
}

/// Routine writer held in process memory
#[derive(Default)]
pub struct MemoryRoutineWriter {
    routines: RwLock<HashMap<Uuid, StoredRoutine>>,
}

impl MemoryRoutineWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, routine_id: Uuid) -> Option<StoredRoutine> {
        self.routines.read().await.get(&routine_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.routines.read().await.len()
    }
}

#[async_trait]
impl RoutineDraftWriter for MemoryRoutineWriter {
    async fn save_draft(
        &self,
        owner_id: Option<Uuid>,
        draft: &RoutineDraft,
        citations: &[Citation],
    ) -> Result<Uuid> {
        let rows = routine_rows(owner_id, draft, citations);
        let routine_id = rows.routine.routine_id;
        self.routines.write().await.insert(routine_id, rows);
        Ok(routine_id)
    }

    async fn set_status(&self, routine_id: Uuid, status: RoutineStatus) -> Result<SavedRoutine> {
        let mut routines = self.routines.write().await;
        let stored = routines
            .get_mut(&routine_id)
            .ok_or_else(|| AppError::RoutineNotFound { id: routine_id.to_string() })?;

        let now = Utc::now();
        stored.routine.status = status.as_str().to_string();
        stored.routine.updated_at = now.into();

        Ok(SavedRoutine {
            routine_id,
            status,
            updated_at: now,
        })
    }
}

/// Rows written for one draft; shared by both writers
pub(crate) fn routine_rows(
    owner_id: Option<Uuid>,
    draft: &RoutineDraft,
    citations: &[Citation],
) -> StoredRoutine {
    let now = Utc::now();
    let routine_id = Uuid::new_v4();

    let target_conditions = if draft.target_conditions.is_empty() {
        None
    } else {
        Some(draft.target_conditions.join(", "))
    };

    let routine = Routine {
        routine_id,
        owner_id,
        description: draft.description.clone(),
        target_skin_type: draft.target_skin_type.clone(),
        target_conditions,
        routine_type: "template".to_string(),
        status: RoutineStatus::Draft.as_str().to_string(),
        source: draft.source.as_str().to_string(),
        is_rag_based: draft.is_rag_based,
        created_at: now.into(),
        updated_at: now.into(),
    };

    let steps = draft
        .steps
        .iter()
        .map(|step| RoutineStep {
            step_id: Uuid::new_v4(),
            routine_id,
            step_order: step.order as i32,
            instruction: step.instruction.clone(),
            time_of_day: step.time_of_day.as_str().to_string(),
            frequency: step.frequency.as_str().to_string(),
        })
        .collect();

    let citations = citations
        .iter()
        .map(|c| RoutineCitation {
            citation_id: Uuid::new_v4(),
            routine_id,
            doc_id: c.doc_id,
            chunk_id: c.chunk_id,
            score: c.score,
        })
        .collect();

    StoredRoutine {
        routine,
        steps,
        citations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Frequency, RoutineSource, RoutineStepDraft, TimeOfDay};
    use crate::db::models::DocumentStatus;

    fn draft() -> RoutineDraft {
        RoutineDraft {
            description: "Calming routine".to_string(),
            target_skin_type: Some("sensitive".to_string()),
            target_conditions: vec!["rosacea".to_string(), "redness".to_string()],
            steps: vec![RoutineStepDraft {
                order: 1,
                instruction: "Rinse with lukewarm water".to_string(),
                time_of_day: TimeOfDay::Both,
                frequency: Frequency::TwiceDaily,
            }],
            is_rag_based: true,
            source: RoutineSource::Rag,
        }
    }

    #[tokio::test]
    async fn test_catalog_create_and_asset_urls() {
        let catalog = MemoryCatalog::new();
        let doc = catalog
            .create_document(
                NewDocument {
                    title: "Rosacea guideline".to_string(),
                    content: Some("text".to_string()),
                    source: Some("guideline:vn-2024".to_string()),
                    status: DocumentStatus::Active,
                    ingest_status: IngestStatus::Queued,
                },
                vec![
                    NewAsset {
                        file_name: "a.pdf".to_string(),
                        url: "https://cdn/a.pdf".to_string(),
                        mime_type: None,
                        size_bytes: Some(10),
                    },
                    NewAsset {
                        file_name: "b.png".to_string(),
                        url: "https://cdn/b.png".to_string(),
                        mime_type: None,
                        size_bytes: None,
                    },
                ],
            )
            .await
            .unwrap();

        let urls = catalog.asset_urls(&[doc.doc_id]).await.unwrap();
        assert_eq!(urls[&doc.doc_id], vec!["https://cdn/a.pdf", "https://cdn/b.png"]);

        catalog.set_ingest_status(doc.doc_id, IngestStatus::Embedded).await.unwrap();
        let found = catalog.find_document(doc.doc_id).await.unwrap().unwrap();
        assert_eq!(found.ingest_status, "embedded");

        let missing = catalog.set_ingest_status(Uuid::new_v4(), IngestStatus::Embedded).await;
        assert!(matches!(missing, Err(AppError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_writer_saves_rows_and_changes_status() {
        let writer = MemoryRoutineWriter::new();
        let citation = Citation {
            doc_id: Uuid::new_v4(),
            chunk_id: Uuid::new_v4(),
            score: 0.82,
        };

        let id = writer.save_draft(None, &draft(), &[citation.clone()]).await.unwrap();
        let stored = writer.get(id).await.unwrap();
        assert_eq!(stored.routine.status, "draft");
        assert_eq!(stored.routine.routine_type, "template");
        assert_eq!(stored.routine.target_conditions.as_deref(), Some("rosacea, redness"));
        assert_eq!(stored.steps[0].time_of_day, "both");
        assert_eq!(stored.citations[0].chunk_id, citation.chunk_id);

        let saved = writer.set_status(id, RoutineStatus::Published).await.unwrap();
        assert_eq!(saved.status, RoutineStatus::Published);
        assert_eq!(writer.get(id).await.unwrap().routine.status, "published");

        let missing = writer.set_status(Uuid::new_v4(), RoutineStatus::Archived).await;
        assert!(matches!(missing, Err(AppError::RoutineNotFound { .. })));
    }
}
