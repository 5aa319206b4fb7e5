//! Generation core
//!
//! Turns retrieved chunks and a user request into a validated routine draft:
//! - Prompt assembly within a character budget
//! - Chat model clients
//! - Orchestration with one corrective re-prompt
//! - Citation tracking
//! - Draft normalization

mod citations;
mod draft;
mod generator;
mod llm;
mod prompt;
mod validator;

pub use citations::{Citation, CitationTracker};
pub use draft::{Frequency, RoutineDraft, RoutineSource, RoutineStepDraft, TimeOfDay};
pub use generator::{
    parse_routine, DraftDefaults, Generated, GenerationOrchestrator, GenerationState, GenerationTrace,
    MAX_PARSE_ATTEMPTS,
};
pub use llm::{create_llm_client, LlmClient, OpenAiLlmClient, ScriptedLlmClient, TemplateLlmClient};
pub use prompt::{
    routine_schema, truncate_context, AssembledPrompt, PromptAssembler, PromptRequest,
    FALLBACK_SYSTEM_PROMPT, RAG_SYSTEM_PROMPT,
};
pub use validator::{normalize_conditions, RoutineDraftValidator};
