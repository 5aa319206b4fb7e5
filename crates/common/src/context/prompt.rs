//! Prompt assembly
//!
//! Builds the grounded (or fallback) user prompt within a character budget.
//! The request section is always kept whole; retrieved chunks are added in
//! descending similarity until the next one no longer fits.

use crate::config::RagConfig;
use crate::vector::ScoredChunk;
use serde_json::json;
use std::fmt::Write;

/// System prompt when retrieved knowledge is attached
pub const RAG_SYSTEM_PROMPT: &str = "You are a dermatology assistant. Build a skincare routine grounded \
in the numbered knowledge excerpts provided. Prefer the excerpts over general knowledge and do not \
invent product claims. Always state that the routine does not replace a consultation with a doctor.";

/// System prompt when nothing relevant was retrieved
pub const FALLBACK_SYSTEM_PROMPT: &str = "You are a dermatology assistant. Use widely accepted public \
medical knowledge and the description provided by the user (including images) to propose a sensible \
skincare routine. Always state that the routine does not replace a consultation with a doctor.";

/// JSON schema of the routine reply
pub fn routine_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "description": { "type": "string" },
            "target_skin_type": { "type": ["string", "null"] },
            "target_conditions": {
                "type": "array",
                "items": { "type": "string" }
            },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "order": { "type": "integer" },
                        "instruction": { "type": "string" },
                        "time_of_day": { "type": "string" },
                        "frequency": { "type": "string" }
                    },
                    "required": ["instruction"]
                },
                "minItems": 1
            }
        },
        "required": ["description", "steps"]
    })
}

/// What the user asked for
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub query: String,
    pub target_skin_type: Option<String>,
    pub target_conditions: Vec<String>,
    pub additional_context: Option<String>,
    pub image_urls: Vec<String>,
    pub max_steps: usize,
    pub num_variants: usize,
}

/// Prompt ready for the chat client
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system: String,
    pub user: String,
    /// Image references forwarded with the prompt
    pub images: Vec<String>,
    /// Chunks that made it into the prompt, in prompt order
    pub included: Vec<ScoredChunk>,
}

impl AssembledPrompt {
    pub fn is_grounded(&self) -> bool {
        !self.included.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    budget_chars: usize,
    max_image_urls: usize,
    additional_context_chars: usize,
}

impl PromptAssembler {
    pub fn new(config: &RagConfig) -> Self {
        Self {
            budget_chars: config.prompt_budget_chars,
            max_image_urls: config.max_image_urls,
            additional_context_chars: config.additional_context_chars,
        }
    }

    /// Assemble the prompt; `retained` is expected best first
    pub fn assemble(&self, system_prompt: &str, retained: &[ScoredChunk], request: &PromptRequest) -> AssembledPrompt {
        let images: Vec<String> = request
            .image_urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .take(self.max_image_urls)
            .map(str::to_string)
            .collect();

        let head = self.request_section(request, &images);
        // Budget covers the whole exchange, system prompt included
        let tail = reply_section(true).chars().count().max(reply_section(false).chars().count());
        let fixed = system_prompt.chars().count() + head.chars().count() + tail;

        let mut ranked: Vec<&ScoredChunk> = retained.iter().collect();
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        let mut knowledge = String::new();
        let mut used = fixed;
        let mut included = Vec::new();
        for chunk in ranked {
            let header = if included.is_empty() { "\nRetrieved knowledge:\n" } else { "" };
            let entry = format!("{}{}", header, knowledge_entry(included.len() + 1, chunk));
            let len = entry.chars().count();
            if used + len > self.budget_chars {
                break;
            }
            used += len;
            knowledge.push_str(&entry);
            included.push(chunk.clone());
        }

        let tail = reply_section(!included.is_empty());
        AssembledPrompt {
            system: system_prompt.to_string(),
            user: format!("{}{}{}", head, knowledge, tail),
            images,
            included,
        }
    }

    fn request_section(&self, request: &PromptRequest, images: &[String]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Create a skincare routine with the following constraints:");
        let _ = writeln!(out, "- Goal: {}", request.query.trim());

        if let Some(skin) = request.target_skin_type.as_deref().filter(|s| !s.trim().is_empty()) {
            let _ = writeln!(out, "- Target skin type: {}", skin.trim());
        }
        if !request.target_conditions.is_empty() {
            let _ = writeln!(out, "- Main concerns: {}", request.target_conditions.join(", "));
        }

        let _ = writeln!(out, "- Maximum steps: {}", request.max_steps);
        let _ = writeln!(
            out,
            "- Variants to consider: {} (return only the best routine)",
            request.num_variants.max(1)
        );
        let _ = writeln!(out, "- End the description with a clear medical disclaimer.");

        if !images.is_empty() {
            let _ = writeln!(
                out,
                "\nUser-provided images (reference only, do not diagnose from them when unsure):"
            );
            for url in images {
                let _ = writeln!(out, "- {}", url);
            }
        }

        if let Some(context) = request.additional_context.as_deref().filter(|c| !c.trim().is_empty()) {
            let _ = writeln!(out, "\nAdditional context supplied by the user:");
            let _ = writeln!(out, "{}", truncate_context(context, self.additional_context_chars));
        }

        out
    }
}

fn knowledge_entry(number: usize, chunk: &ScoredChunk) -> String {
    let title = chunk.chunk.title.as_deref().unwrap_or("untitled");
    let source = chunk.chunk.source.as_deref().unwrap_or("unknown");
    format!("[{}] {} ({})\n{}\n---\n", number, title, source, chunk.chunk.content.trim())
}

fn reply_section(grounded: bool) -> &'static str {
    if grounded {
        "\nReply with JSON containing description, target_skin_type, target_conditions[] and steps[] \
         ({order, instruction, time_of_day, frequency}). Ground each step in the numbered knowledge.\n"
    } else {
        "\nReply with JSON containing description, target_skin_type, target_conditions[] and steps[] \
         ({order, instruction, time_of_day, frequency}).\n"
    }
}

/// Trim `text` to `max_chars` characters, marking the cut with "..."
pub fn truncate_context(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::StoredChunk;
    use chrono::Utc;
    use uuid::Uuid;

    fn chunk(content: &str, distance: f64, seq: i64) -> ScoredChunk {
        ScoredChunk::new(
            StoredChunk {
                chunk_id: Uuid::new_v4(),
                doc_id: Uuid::new_v4(),
                chunk_index: 0,
                content: content.to_string(),
                token_count: (content.len() / 4) as i32,
                embedding_model: "text-embedding-3-small".to_string(),
                title: Some(format!("Doc {}", seq)),
                source: Some("faq".to_string()),
                seq,
                created_at: Utc::now(),
            },
            distance,
        )
    }

    fn request(query: &str) -> PromptRequest {
        PromptRequest {
            query: query.to_string(),
            max_steps: 12,
            num_variants: 1,
            ..Default::default()
        }
    }

    fn assembler(budget: usize) -> PromptAssembler {
        PromptAssembler::new(&RagConfig {
            prompt_budget_chars: budget,
            ..RagConfig::default()
        })
    }

    #[test]
    fn test_annotates_chunks_with_title_and_source() {
        let retained = vec![chunk("Use azelaic acid at night.", 0.2, 1)];
        let prompt = assembler(12_000).assemble(RAG_SYSTEM_PROMPT, &retained, &request("rosacea treatment"));

        assert!(prompt.user.contains("[1] Doc 1 (faq)"));
        assert!(prompt.user.contains("Use azelaic acid at night."));
        assert!(prompt.user.contains("- Goal: rosacea treatment"));
        assert!(prompt.user.contains("disclaimer"));
        assert_eq!(prompt.system, RAG_SYSTEM_PROMPT);
        assert_eq!(prompt.included.len(), 1);
        assert!(prompt.is_grounded());
    }

    #[test]
    fn test_budget_drops_lowest_similarity_first() {
        let body = "x".repeat(400);
        let retained = vec![chunk(&body, 0.6, 3), chunk(&body, 0.2, 1), chunk(&body, 0.4, 2)];
        let base = assembler(12_000).assemble(RAG_SYSTEM_PROMPT, &[], &request("acne"));
        // Room for the system prompt, the request section and two entries
        let budget = base.system.chars().count() + base.user.chars().count() + 1000;

        let prompt = assembler(budget).assemble(RAG_SYSTEM_PROMPT, &retained, &request("acne"));
        assert_eq!(prompt.included.len(), 2);
        assert_eq!(prompt.included[0].chunk.seq, 1);
        assert_eq!(prompt.included[1].chunk.seq, 2);
        assert!(prompt.system.chars().count() + prompt.user.chars().count() <= budget);
    }

    #[test]
    fn test_budget_counts_system_prompt() {
        let body = "y".repeat(300);
        let retained = vec![chunk(&body, 0.1, 1)];
        let base = assembler(12_000).assemble(RAG_SYSTEM_PROMPT, &[], &request("acne"));
        // Enough for the user prompt and the entry alone, not with the system prompt on top
        let budget = base.user.chars().count() + 500;

        let prompt = assembler(budget).assemble(RAG_SYSTEM_PROMPT, &retained, &request("acne"));
        assert!(prompt.included.is_empty());

        let roomy = assembler(budget + RAG_SYSTEM_PROMPT.chars().count())
            .assemble(RAG_SYSTEM_PROMPT, &retained, &request("acne"));
        assert_eq!(roomy.included.len(), 1);
        assert!(roomy.system.chars().count() + roomy.user.chars().count() <= budget + RAG_SYSTEM_PROMPT.chars().count());
    }

    #[test]
    fn test_query_never_truncated() {
        let query = "q".repeat(500);
        let retained = vec![chunk("short", 0.1, 1)];
        let prompt = assembler(100).assemble(RAG_SYSTEM_PROMPT, &retained, &request(&query));

        assert!(prompt.user.contains(&query));
        assert!(prompt.included.is_empty());
        assert!(!prompt.is_grounded());
    }

    #[test]
    fn test_images_capped_and_context_truncated() {
        let mut req = request("dry skin");
        req.image_urls = (0..8).map(|i| format!("https://img/{}.jpg", i)).collect();
        req.additional_context = Some("c".repeat(7000));

        let prompt = assembler(20_000).assemble(FALLBACK_SYSTEM_PROMPT, &[], &req);
        assert_eq!(prompt.images.len(), 5);
        assert!(prompt.user.contains("https://img/4.jpg"));
        assert!(!prompt.user.contains("https://img/5.jpg"));
        assert!(prompt.user.contains(&format!("{}...", "c".repeat(6000))));
        assert!(!prompt.user.contains(&"c".repeat(6001)));
    }

    #[test]
    fn test_deterministic() {
        let retained = vec![chunk("a. b.", 0.3, 1), chunk("c. d.", 0.3, 2)];
        let a = assembler(12_000).assemble(RAG_SYSTEM_PROMPT, &retained, &request("q"));
        let b = assembler(12_000).assemble(RAG_SYSTEM_PROMPT, &retained, &request("q"));
        assert_eq!(a.user, b.user);
        // Equal similarity keeps the retained order
        assert_eq!(a.included[0].chunk.seq, 1);
    }

    #[test]
    fn test_truncate_context() {
        assert_eq!(truncate_context("  short  ", 10), "short");
        assert_eq!(truncate_context("abcdef", 3), "abc...");
    }
}
