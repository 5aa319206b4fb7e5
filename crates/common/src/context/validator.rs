//! Routine draft normalization

use super::draft::RoutineDraft;
use crate::config::RagConfig;
use crate::errors::{AppError, Result};

/// Normalizes parsed drafts before they leave the pipeline
#[derive(Debug, Clone, Copy)]
pub struct RoutineDraftValidator {
    min_steps: usize,
}

impl RoutineDraftValidator {
    pub fn new(config: &RagConfig) -> Self {
        Self {
            min_steps: config.min_steps,
        }
    }

    /// Dense 1-based step order, at most `max_steps` steps, tidy conditions.
    ///
    /// Fails only when fewer than `min_steps` usable steps remain.
    pub fn validate(&self, mut draft: RoutineDraft, max_steps: usize) -> Result<RoutineDraft> {
        draft.description = draft.description.trim().to_string();
        draft.target_skin_type = draft
            .target_skin_type
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        draft.target_conditions = normalize_conditions(&draft.target_conditions);

        draft.steps.retain(|s| !s.instruction.trim().is_empty());
        // sort_by_key is stable, so equal orders keep emission order
        draft.steps.sort_by_key(|s| s.order);
        draft.steps.truncate(max_steps.max(1));
        for (i, step) in draft.steps.iter_mut().enumerate() {
            step.order = i as u32 + 1;
            step.instruction = step.instruction.trim().to_string();
        }

        if draft.steps.len() < self.min_steps {
            return Err(AppError::validation(
                "steps",
                format!(
                    "routine has {} usable steps, at least {} required",
                    draft.steps.len(),
                    self.min_steps
                ),
            ));
        }

        Ok(draft)
    }
}

/// Split on `,` and `;`, trim, and drop empties and case-insensitive repeats
pub fn normalize_conditions(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .flat_map(|c| c.split([',', ';']))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.to_lowercase()))
        .map(str::to_string)
        .collect()
}
