//! Routine draft types and their closed vocabularies

use crate::errors::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// When a step is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    #[default]
    Morning,
    Evening,
    Both,
}

impl TimeOfDay {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Both => "both",
        }
    }

    /// Map free-form model output onto the vocabulary; unknown or missing is morning.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(value) = raw.map(|v| v.trim().to_lowercase()).filter(|v| !v.is_empty()) else {
            return TimeOfDay::default();
        };

        match value.as_str() {
            "morning" | "am" | "day" => return TimeOfDay::Morning,
            "evening" | "pm" | "night" => return TimeOfDay::Evening,
            "both" | "am/pm" | "am_pm" => return TimeOfDay::Both,
            _ => {}
        }

        let morning = value.contains("morning") || value.contains("sáng");
        let evening = value.contains("evening") || value.contains("night") || value.contains("tối");

        if (morning && evening) || value.contains("both") || value.contains("cả ngày") {
            TimeOfDay::Both
        } else if evening {
            TimeOfDay::Evening
        } else {
            TimeOfDay::Morning
        }
    }
}

impl FromStr for TimeOfDay {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "morning" => Ok(TimeOfDay::Morning),
            "evening" => Ok(TimeOfDay::Evening),
            "both" => Ok(TimeOfDay::Both),
            other => Err(AppError::validation(
                "time_of_day",
                format!("'{}' is not one of morning, evening, both", other),
            )),
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a step is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    TwiceDaily,
    Weekly,
    AsNeeded,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::TwiceDaily => "twice_daily",
            Frequency::Weekly => "weekly",
            Frequency::AsNeeded => "as_needed",
        }
    }

    /// Map free-form model output onto the vocabulary; unknown or missing is daily.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(value) = raw.map(|v| v.trim().to_lowercase()).filter(|v| !v.is_empty()) else {
            return Frequency::default();
        };

        match value.as_str() {
            "daily" => return Frequency::Daily,
            "twice_daily" | "2x daily" | "twice a day" | "bid" => return Frequency::TwiceDaily,
            "weekly" => return Frequency::Weekly,
            "as_needed" | "as needed" | "prn" => return Frequency::AsNeeded,
            _ => {}
        }

        if value.contains("week") || value.contains("tuần") {
            Frequency::Weekly
        } else if value.contains("twice")
            || value.contains("2x")
            || value.contains("2 lần")
            || value.contains("hai lần")
            || value.contains("morning and evening")
            || value.contains("sáng và tối")
        {
            Frequency::TwiceDaily
        } else if value.contains("as needed") || value.contains("khi cần") || value.contains("tùy") {
            Frequency::AsNeeded
        } else {
            Frequency::Daily
        }
    }
}

impl FromStr for Frequency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Frequency::Daily),
            "twice_daily" => Ok(Frequency::TwiceDaily),
            "weekly" => Ok(Frequency::Weekly),
            "as_needed" => Ok(Frequency::AsNeeded),
            other => Err(AppError::validation(
                "frequency",
                format!("'{}' is not one of daily, twice_daily, weekly, as_needed", other),
            )),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced a routine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineSource {
    /// Grounded in retrieved chunks
    Rag,
    /// Retrieval ran but nothing cleared the threshold
    Llm,
    /// Free-text generation without retrieval
    LlmText,
}

impl RoutineSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineSource::Rag => "rag",
            RoutineSource::Llm => "llm",
            RoutineSource::LlmText => "llm_text",
        }
    }
}

impl FromStr for RoutineSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rag" => Ok(RoutineSource::Rag),
            "llm" => Ok(RoutineSource::Llm),
            "llm_text" => Ok(RoutineSource::LlmText),
            other => Err(AppError::validation("source", format!("unknown routine source '{}'", other))),
        }
    }
}

impl fmt::Display for RoutineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a routine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineStepDraft {
    pub order: u32,
    pub instruction: String,
    pub time_of_day: TimeOfDay,
    pub frequency: Frequency,
}

/// A generated routine before persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineDraft {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_skin_type: Option<String>,
    pub target_conditions: Vec<String>,
    pub steps: Vec<RoutineStepDraft>,
    pub is_rag_based: bool,
    pub source: RoutineSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_synonyms() {
        assert_eq!(TimeOfDay::normalize(None), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::normalize(Some("  ")), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::normalize(Some("AM")), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::normalize(Some("day")), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::normalize(Some("PM")), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::normalize(Some("before bed at night")), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::normalize(Some("am/pm")), TimeOfDay::Both);
        assert_eq!(TimeOfDay::normalize(Some("Morning and evening")), TimeOfDay::Both);
        assert_eq!(TimeOfDay::normalize(Some("sáng và tối")), TimeOfDay::Both);
        assert_eq!(TimeOfDay::normalize(Some("buổi tối")), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::normalize(Some("whenever")), TimeOfDay::Morning);
    }

    #[test]
    fn test_frequency_synonyms() {
        assert_eq!(Frequency::normalize(None), Frequency::Daily);
        assert_eq!(Frequency::normalize(Some("2x daily")), Frequency::TwiceDaily);
        assert_eq!(Frequency::normalize(Some("Twice a day")), Frequency::TwiceDaily);
        assert_eq!(Frequency::normalize(Some("2 lần mỗi ngày")), Frequency::TwiceDaily);
        assert_eq!(Frequency::normalize(Some("prn")), Frequency::AsNeeded);
        assert_eq!(Frequency::normalize(Some("As needed")), Frequency::AsNeeded);
        assert_eq!(Frequency::normalize(Some("khi cần")), Frequency::AsNeeded);
        assert_eq!(Frequency::normalize(Some("2-3 times a week")), Frequency::Weekly);
        assert_eq!(Frequency::normalize(Some("hằng ngày")), Frequency::Daily);
        assert_eq!(Frequency::normalize(Some("sometimes")), Frequency::Daily);
    }

    #[test]
    fn test_strict_parse_rejects_unknown() {
        assert_eq!("both".parse::<TimeOfDay>().unwrap(), TimeOfDay::Both);
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert_eq!("as_needed".parse::<Frequency>().unwrap(), Frequency::AsNeeded);
        assert!("hourly".parse::<Frequency>().is_err());
        assert_eq!("llm_text".parse::<RoutineSource>().unwrap(), RoutineSource::LlmText);
    }

    #[test]
    fn test_draft_serializes_camel_case() {
        let draft = RoutineDraft {
            description: "Gentle routine".to_string(),
            target_skin_type: None,
            target_conditions: vec!["rosacea".to_string()],
            steps: vec![RoutineStepDraft {
                order: 1,
                instruction: "Cleanse".to_string(),
                time_of_day: TimeOfDay::Both,
                frequency: Frequency::TwiceDaily,
            }],
            is_rag_based: true,
            source: RoutineSource::Rag,
        };

        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["isRagBased"], true);
        assert_eq!(json["source"], "rag");
        assert_eq!(json["steps"][0]["timeOfDay"], "both");
        assert_eq!(json["steps"][0]["frequency"], "twice_daily");
        assert!(json.get("targetSkinType").is_none());
    }
}
