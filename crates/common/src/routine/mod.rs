//! Routine generation service
//!
//! Runs the query pipeline end to end:
//! retrieve → assemble (grounded or fallback) → generate → validate → cite,
//! then optionally saves the result as a draft routine.

use crate::config::AppConfig;
use crate::context::{
    normalize_conditions, Citation, CitationTracker, DraftDefaults, GenerationOrchestrator,
    GenerationState, GenerationTrace, PromptAssembler, PromptRequest, RoutineDraft,
    RoutineDraftValidator, RoutineSource, FALLBACK_SYSTEM_PROMPT, RAG_SYSTEM_PROMPT,
};
use crate::db::models::RoutineStatus;
use crate::db::{RoutineDraftWriter, SavedRoutine};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::resilience::CancelToken;
use crate::retrieval::{RetrievalQuery, Retriever};
use crate::services::RagServices;
use crate::vector::SearchFilter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// Query used when a text request only carries context
const CONTEXT_ONLY_QUERY: &str = "Create a routine based on the provided context";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRoutineRequest {
    pub query: String,
    pub target_skin_type: Option<String>,
    #[serde(default)]
    pub target_conditions: Vec<String>,
    pub additional_context: Option<String>,
    pub k: Option<usize>,
    pub max_steps: Option<usize>,
    pub num_variants: Option<usize>,
    pub auto_save_as_draft: Option<bool>,
    pub document_ids: Option<Vec<Uuid>>,
    pub embedding_model: Option<String>,
    pub image_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateFromTextRequest {
    pub prompt: Option<String>,
    pub context: Option<String>,
    pub target_skin_type: Option<String>,
    #[serde(default)]
    pub target_conditions: Vec<String>,
    pub auto_save_as_draft: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedRoutine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routine_id: Option<Uuid>,
    pub routine: RoutineDraft,
    pub citations: Vec<Citation>,
    pub is_rag_based: bool,
    pub source: RoutineSource,
    /// Corrective re-prompts issued
    pub retries: u32,
}

pub struct RoutineService {
    config: Arc<AppConfig>,
    retriever: Retriever,
    assembler: PromptAssembler,
    orchestrator: GenerationOrchestrator,
    validator: RoutineDraftValidator,
    writer: Arc<dyn RoutineDraftWriter>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl RoutineService {
    pub fn new(services: &RagServices) -> Self {
        Self {
            config: services.config.clone(),
            retriever: services.retriever(),
            assembler: PromptAssembler::new(&services.config.rag),
            orchestrator: GenerationOrchestrator::new(services.llm.clone()),
            validator: RoutineDraftValidator::new(&services.config.rag),
            writer: services.writer.clone(),
        }
    }

    fn resolve_max_steps(&self, requested: Option<usize>) -> Result<usize> {
        let max_steps = requested.unwrap_or(self.config.rag.max_steps);
        let limit = self.config.rag.max_steps_limit;
        if max_steps == 0 || max_steps > limit {
            return Err(AppError::validation(
                "maxSteps",
                format!("maxSteps must be between 1 and {}", limit),
            ));
        }
        Ok(max_steps)
    }

    /// Generate a routine, grounded in retrieved chunks when any clear the threshold
    #[instrument(skip(self, request, cancel), fields(owner_id = ?owner_id))]
    pub async fn generate(
        &self,
        request: GenerateRoutineRequest,
        owner_id: Option<Uuid>,
        cancel: &CancelToken,
    ) -> Result<GeneratedRoutine> {
        let start = Instant::now();
        let result = self.generate_inner(request, owner_id, cancel).await;
        record(start, &result);
        result
    }

    async fn generate_inner(
        &self,
        request: GenerateRoutineRequest,
        owner_id: Option<Uuid>,
        cancel: &CancelToken,
    ) -> Result<GeneratedRoutine> {
        let query = request.query.trim().to_string();
        if query.is_empty() {
            return Err(AppError::validation("query", "query cannot be empty"));
        }
        let max_steps = self.resolve_max_steps(request.max_steps)?;
        let k = self.retriever.clamp_k(request.k.unwrap_or(self.config.rag.generation_k));
        let conditions = normalize_conditions(&request.target_conditions);

        let mut trace = GenerationTrace::new();
        trace.advance(GenerationState::Embedding);
        let retrieval = self
            .retriever
            .retrieve(
                RetrievalQuery {
                    text: query.clone(),
                    k,
                    filter: SearchFilter {
                        sources: None,
                        document_ids: request.document_ids.filter(|ids| !ids.is_empty()),
                    },
                    min_similarity: self.config.rag.min_similarity,
                    embedding_model: non_blank(request.embedding_model.as_deref()),
                    user_id: owner_id,
                },
                cancel,
            )
            .await
            .map_err(|e| trace.fail(e))?;
        trace.advance(GenerationState::Retrieving);

        let prompt_request = PromptRequest {
            query,
            target_skin_type: non_blank(request.target_skin_type.as_deref()),
            target_conditions: conditions.clone(),
            additional_context: request.additional_context,
            image_urls: request.image_urls.unwrap_or_default(),
            max_steps,
            num_variants: request.num_variants.unwrap_or(1).max(1),
        };

        let prompt = if retrieval.sufficient {
            trace.advance(GenerationState::AssemblingRag);
            self.assembler
                .assemble(RAG_SYSTEM_PROMPT, &retrieval.retained, &prompt_request)
        } else {
            trace.advance(GenerationState::AssemblingFallback);
            self.assembler.assemble(FALLBACK_SYSTEM_PROMPT, &[], &prompt_request)
        };

        // A budget too small for any chunk leaves nothing to cite
        let source = if prompt.is_grounded() {
            RoutineSource::Rag
        } else {
            RoutineSource::Llm
        };

        let defaults = DraftDefaults {
            target_skin_type: prompt_request.target_skin_type.clone(),
            target_conditions: conditions,
            source,
        };
        let generated = self
            .orchestrator
            .generate(&prompt, &defaults, &mut trace, cancel)
            .await?;

        trace.advance(GenerationState::Validating);
        let draft = self
            .validator
            .validate(generated.draft, max_steps)
            .map_err(|e| trace.fail(e))?;
        let citations = CitationTracker::track(&prompt.included);

        self.finish(
            draft,
            citations,
            generated.retries,
            request.auto_save_as_draft.unwrap_or(true),
            owner_id,
            &mut trace,
            cancel,
        )
        .await
    }

    /// Generate a routine from free text without retrieval
    #[instrument(skip(self, request, cancel), fields(owner_id = ?owner_id))]
    pub async fn generate_from_text(
        &self,
        request: GenerateFromTextRequest,
        owner_id: Option<Uuid>,
        cancel: &CancelToken,
    ) -> Result<GeneratedRoutine> {
        let start = Instant::now();
        let result = self.generate_from_text_inner(request, owner_id, cancel).await;
        record(start, &result);
        result
    }

    async fn generate_from_text_inner(
        &self,
        request: GenerateFromTextRequest,
        owner_id: Option<Uuid>,
        cancel: &CancelToken,
    ) -> Result<GeneratedRoutine> {
        let prompt_text = non_blank(request.prompt.as_deref());
        let context = non_blank(request.context.as_deref());
        if prompt_text.is_none() && context.is_none() {
            return Err(AppError::validation("prompt", "prompt or context is required"));
        }

        let max_steps = self.config.rag.max_steps;
        let conditions = normalize_conditions(&request.target_conditions);
        let prompt_request = PromptRequest {
            query: prompt_text.unwrap_or_else(|| CONTEXT_ONLY_QUERY.to_string()),
            target_skin_type: non_blank(request.target_skin_type.as_deref()),
            target_conditions: conditions.clone(),
            additional_context: context,
            image_urls: Vec::new(),
            max_steps,
            num_variants: 1,
        };

        let mut trace = GenerationTrace::new();
        trace.advance(GenerationState::AssemblingFallback);
        let prompt = self.assembler.assemble(FALLBACK_SYSTEM_PROMPT, &[], &prompt_request);

        let defaults = DraftDefaults {
            target_skin_type: prompt_request.target_skin_type.clone(),
            target_conditions: conditions,
            source: RoutineSource::LlmText,
        };
        let generated = self
            .orchestrator
            .generate(&prompt, &defaults, &mut trace, cancel)
            .await?;

        trace.advance(GenerationState::Validating);
        let draft = self
            .validator
            .validate(generated.draft, max_steps)
            .map_err(|e| trace.fail(e))?;

        self.finish(
            draft,
            Vec::new(),
            generated.retries,
            request.auto_save_as_draft.unwrap_or(true),
            owner_id,
            &mut trace,
            cancel,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        mut draft: RoutineDraft,
        citations: Vec<Citation>,
        retries: u32,
        auto_save: bool,
        owner_id: Option<Uuid>,
        trace: &mut GenerationTrace,
        cancel: &CancelToken,
    ) -> Result<GeneratedRoutine> {
        if cancel.is_cancelled() {
            return Err(trace.fail(AppError::Cancelled {
                operation: "routine generation".to_string(),
            }));
        }

        draft.is_rag_based = !citations.is_empty();
        if !draft.is_rag_based && draft.source == RoutineSource::Rag {
            draft.source = RoutineSource::Llm;
        }

        let routine_id = if auto_save {
            let id = self
                .writer
                .save_draft(owner_id, &draft, &citations)
                .await
                .map_err(|e| trace.fail(e))?;
            Some(id)
        } else {
            None
        };

        trace.advance(GenerationState::Completed);
        info!(
            routine_id = ?routine_id,
            source = draft.source.as_str(),
            steps = draft.steps.len(),
            citations = citations.len(),
            retries = retries,
            "Routine generated"
        );

        Ok(GeneratedRoutine {
            routine_id,
            is_rag_based: draft.is_rag_based,
            source: draft.source,
            routine: draft,
            citations,
            retries,
        })
    }

    #[instrument(skip(self))]
    pub async fn publish(&self, routine_id: Uuid) -> Result<SavedRoutine> {
        self.writer.set_status(routine_id, RoutineStatus::Published).await
    }

    #[instrument(skip(self))]
    pub async fn archive(&self, routine_id: Uuid) -> Result<SavedRoutine> {
        self.writer.set_status(routine_id, RoutineStatus::Archived).await
    }
}

fn record(start: Instant, result: &Result<GeneratedRoutine>) {
    let elapsed = start.elapsed().as_secs_f64();
    match result {
        Ok(generated) => {
            metrics::record_generation(elapsed, generated.source.as_str(), generated.retries, true)
        }
        Err(_) => metrics::record_generation(elapsed, "none", 0, false),
    }
}
