//! Generation orchestration
//!
//! Calls the chat model with an assembled prompt and parses the reply into a
//! raw routine draft. Unusable output earns exactly one corrective re-prompt.
//! Provider failures are retried inside the client and are not re-prompted.

use super::draft::{Frequency, RoutineDraft, RoutineSource, RoutineStepDraft, TimeOfDay};
use super::llm::LlmClient;
use super::prompt::{routine_schema, AssembledPrompt};
use crate::errors::{AppError, Result};
use crate::resilience::CancelToken;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, instrument, warn};

/// Attempts allowed for one generation, the corrective re-prompt included
pub const MAX_PARSE_ATTEMPTS: u32 = 2;

/// Stages of a routine generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Received,
    Embedding,
    Retrieving,
    AssemblingRag,
    AssemblingFallback,
    Generating,
    Parsing,
    Validating,
    Completed,
    Error,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Received => "received",
            GenerationState::Embedding => "embedding",
            GenerationState::Retrieving => "retrieving",
            GenerationState::AssemblingRag => "assembling_rag",
            GenerationState::AssemblingFallback => "assembling_fallback",
            GenerationState::Generating => "generating",
            GenerationState::Parsing => "parsing",
            GenerationState::Validating => "validating",
            GenerationState::Completed => "completed",
            GenerationState::Error => "error",
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Received, Embedding)
                | (Received, AssemblingFallback)
                | (Embedding, Retrieving)
                | (Retrieving, AssemblingRag)
                | (Retrieving, AssemblingFallback)
                | (AssemblingRag, Generating)
                | (AssemblingFallback, Generating)
                | (Generating, Parsing)
                | (Parsing, Generating)
                | (Parsing, Validating)
                | (Validating, Completed)
                | (Embedding, Error)
                | (Retrieving, Error)
                | (Generating, Error)
                | (Parsing, Error)
                | (Validating, Error)
        )
    }
}

/// Tracks the current stage of one request and logs each transition
#[derive(Debug)]
pub struct GenerationTrace {
    state: GenerationState,
}

impl Default for GenerationTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationTrace {
    pub fn new() -> Self {
        Self {
            state: GenerationState::Received,
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn advance(&mut self, next: GenerationState) {
        if !self.state.can_advance_to(next) {
            warn!(from = self.state.as_str(), to = next.as_str(), "Unexpected generation transition");
        }
        debug!(from = self.state.as_str(), to = next.as_str(), "Generation state");
        self.state = next;
    }

    /// Move to `Error` and hand the error back
    pub fn fail(&mut self, error: AppError) -> AppError {
        warn!(state = self.state.as_str(), error = %error, "Generation failed");
        self.state = GenerationState::Error;
        error
    }
}

/// Values the parser falls back to when the model omits them
#[derive(Debug, Clone)]
pub struct DraftDefaults {
    pub target_skin_type: Option<String>,
    pub target_conditions: Vec<String>,
    pub source: RoutineSource,
}

/// A parsed, not yet validated, routine
#[derive(Debug, Clone)]
pub struct Generated {
    pub draft: RoutineDraft,
    /// Corrective re-prompts issued, 0 or 1
    pub retries: u32,
}

pub struct GenerationOrchestrator {
    llm: Arc<dyn LlmClient>,
}

impl GenerationOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate and parse a routine for `prompt`
    #[instrument(skip_all, fields(model = self.llm.model_name(), grounded = prompt.is_grounded()))]
    pub async fn generate(
        &self,
        prompt: &AssembledPrompt,
        defaults: &DraftDefaults,
        trace: &mut GenerationTrace,
        cancel: &CancelToken,
    ) -> Result<Generated> {
        let schema = routine_schema();
        let mut user = prompt.user.clone();
        let mut last_problem = String::new();

        for attempt in 1..=MAX_PARSE_ATTEMPTS {
            trace.advance(GenerationState::Generating);
            let raw = self
                .llm
                .chat_json(&prompt.system, &user, &schema, &prompt.images, cancel)
                .await
                .map_err(|e| trace.fail(e))?;

            trace.advance(GenerationState::Parsing);
            match parse_routine(&raw, defaults) {
                Ok(draft) => {
                    return Ok(Generated {
                        draft,
                        retries: attempt - 1,
                    });
                }
                Err(problem) => {
                    warn!(attempt = attempt, problem = %problem, "Unusable routine output");
                    user = corrective_prompt(&prompt.user, &problem);
                    last_problem = problem;
                }
            }
        }

        Err(trace.fail(AppError::GenerationFailed {
            message: last_problem,
            attempts: MAX_PARSE_ATTEMPTS,
        }))
    }
}

fn corrective_prompt(original: &str, problem: &str) -> String {
    format!(
        "{}\nYour previous reply could not be used ({}). Reply again with only a JSON object \
         matching the schema, including at least one step with an instruction.\n",
        original, problem
    )
}

fn code_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("code fence pattern compiles")
    })
}

/// Strip a surrounding markdown code fence, if any
fn strip_fence(raw: &str) -> &str {
    match code_fence().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn order_field(value: &Value) -> Option<i64> {
    match value.get("order")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse a model reply into a raw draft; `Err` describes why it is unusable
pub fn parse_routine(raw: &str, defaults: &DraftDefaults) -> std::result::Result<RoutineDraft, String> {
    let root: Value = serde_json::from_str(strip_fence(raw)).map_err(|e| format!("invalid JSON: {}", e))?;
    if !root.is_object() {
        return Err("reply is not a JSON object".to_string());
    }

    let mut steps = Vec::new();
    for item in root.get("steps").and_then(Value::as_array).into_iter().flatten() {
        let Some(instruction) = string_field(item, "instruction") else {
            continue;
        };
        let order = order_field(item).unwrap_or(steps.len() as i64 + 1);
        steps.push(RoutineStepDraft {
            order: order.clamp(0, u32::MAX as i64) as u32,
            instruction: instruction.to_string(),
            time_of_day: TimeOfDay::normalize(item.get("time_of_day").and_then(Value::as_str)),
            frequency: Frequency::normalize(item.get("frequency").and_then(Value::as_str)),
        });
    }
    if steps.is_empty() {
        return Err("no usable steps".to_string());
    }

    let conditions: Vec<String> = root
        .get("target_conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    Ok(RoutineDraft {
        description: string_field(&root, "description").unwrap_or_default().to_string(),
        target_skin_type: string_field(&root, "target_skin_type")
            .map(str::to_string)
            .or_else(|| defaults.target_skin_type.clone()),
        target_conditions: if conditions.is_empty() {
            defaults.target_conditions.clone()
        } else {
            conditions
        },
        steps,
        is_rag_based: defaults.source == RoutineSource::Rag,
        source: defaults.source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::llm::ScriptedLlmClient;

    const VALID: &str = r#"{
        "description": "Calm rosacea-prone skin. Not a substitute for medical advice.",
        "target_skin_type": "sensitive",
        "target_conditions": ["rosacea"],
        "steps": [
            {"order": 2, "instruction": "Apply azelaic acid 15%", "time_of_day": "pm", "frequency": "daily"},
            {"order": 1, "instruction": "Cleanse gently", "time_of_day": "am/pm", "frequency": "2x daily"}
        ]
    }"#;

    fn defaults() -> DraftDefaults {
        DraftDefaults {
            target_skin_type: None,
            target_conditions: vec!["redness".to_string()],
            source: RoutineSource::Llm,
        }
    }

    fn prompt() -> AssembledPrompt {
        AssembledPrompt {
            system: "system".to_string(),
            user: "Create a routine".to_string(),
            images: Vec::new(),
            included: Vec::new(),
        }
    }

    #[test]
    fn test_parse_valid_reply() {
        let draft = parse_routine(VALID, &defaults()).unwrap();
        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.steps[0].order, 2);
        assert_eq!(draft.steps[0].time_of_day, TimeOfDay::Evening);
        assert_eq!(draft.steps[1].time_of_day, TimeOfDay::Both);
        assert_eq!(draft.steps[1].frequency, Frequency::TwiceDaily);
        assert_eq!(draft.target_conditions, vec!["rosacea"]);
        assert_eq!(draft.target_skin_type.as_deref(), Some("sensitive"));
        assert_eq!(draft.source, RoutineSource::Llm);
        assert!(!draft.is_rag_based);
    }

    #[test]
    fn test_parse_fills_defaults() {
        let raw = r#"{"description": "d", "steps": [
            {"instruction": "  "},
            {"instruction": "Moisturize"},
            {"instruction": "Sunscreen", "order": "7", "time_of_day": null}
        ]}"#;
        let draft = parse_routine(raw, &defaults()).unwrap();

        assert_eq!(draft.steps.len(), 2);
        assert_eq!(draft.steps[0].order, 1);
        assert_eq!(draft.steps[0].time_of_day, TimeOfDay::Morning);
        assert_eq!(draft.steps[0].frequency, Frequency::Daily);
        assert_eq!(draft.steps[1].order, 7);
        assert_eq!(draft.target_conditions, vec!["redness"]);
    }

    #[test]
    fn test_parse_strips_code_fence() {
        let fenced = format!("```json\n{}\n```", VALID);
        assert!(parse_routine(&fenced, &defaults()).is_ok());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_routine("not json", &defaults()).is_err());
        assert!(parse_routine("[1, 2]", &defaults()).is_err());
        assert!(parse_routine(r#"{"description": "d", "steps": []}"#, &defaults()).is_err());
        assert!(parse_routine(r#"{"description": "d"}"#, &defaults()).is_err());
    }

    #[tokio::test]
    async fn test_one_corrective_reprompt() {
        let llm = Arc::new(ScriptedLlmClient::new(vec!["oops".to_string(), VALID.to_string()]));
        let orchestrator = GenerationOrchestrator::new(llm.clone());
        let mut trace = GenerationTrace::new();
        trace.advance(GenerationState::AssemblingFallback);

        let generated = orchestrator
            .generate(&prompt(), &defaults(), &mut trace, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(generated.retries, 1);
        assert_eq!(trace.state(), GenerationState::Parsing);
        let prompts = llm.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("Create a routine"));
        assert!(prompts[1].contains("could not be used"));
    }

    #[tokio::test]
    async fn test_malformed_twice_fails() {
        let llm = Arc::new(ScriptedLlmClient::new(vec!["oops".to_string(), "{}".to_string()]));
        let orchestrator = GenerationOrchestrator::new(llm.clone());
        let mut trace = GenerationTrace::new();

        let err = orchestrator
            .generate(&prompt(), &defaults(), &mut trace, &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::GenerationFailed { attempts: 2, .. }));
        assert_eq!(trace.state(), GenerationState::Error);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_provider_error_is_not_reprompted() {
        let llm = Arc::new(ScriptedLlmClient::with_results(vec![Err(AppError::UpstreamExhausted {
            service: "llm".into(),
            attempts: 3,
            message: "503".into(),
        })]));
        let orchestrator = GenerationOrchestrator::new(llm.clone());

        let err = orchestrator
            .generate(&prompt(), &defaults(), &mut GenerationTrace::new(), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UpstreamExhausted { .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn test_state_transitions() {
        assert!(GenerationState::Received.can_advance_to(GenerationState::Embedding));
        assert!(GenerationState::Parsing.can_advance_to(GenerationState::Generating));
        assert!(!GenerationState::Completed.can_advance_to(GenerationState::Generating));
        assert!(!GenerationState::Received.can_advance_to(GenerationState::Error));
    }
}
