//! Medical document entity

use crate::errors::AppError;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a document participates in retrieval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Active,
    Inactive,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Active => "active",
            DocumentStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(DocumentStatus::Active),
            "inactive" => Ok(DocumentStatus::Inactive),
            other => Err(AppError::validation(
                "status",
                format!("unknown document status '{}', expected active or inactive", other),
            )),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a document is in the ingest flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// Content is present and waiting to be embedded
    Queued,
    /// Only assets were stored; nothing to embed
    AssetsUploaded,
    /// Chunks were written
    Embedded,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Queued => "queued",
            IngestStatus::AssetsUploaded => "assets_uploaded",
            IngestStatus::Embedded => "embedded",
        }
    }
}

impl FromStr for IngestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(IngestStatus::Queued),
            "assets_uploaded" => Ok(IngestStatus::AssetsUploaded),
            "embedded" => Ok(IngestStatus::Embedded),
            other => Err(AppError::validation(
                "ingest_status",
                format!("unknown ingest status '{}'", other),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "medical_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub doc_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub source: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub ingest_status: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Typed status; unknown stored values read as inactive
    pub fn document_status(&self) -> DocumentStatus {
        self.status.parse().unwrap_or(DocumentStatus::Inactive)
    }

    /// Content that can be chunked, if any
    pub fn embeddable_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        assert_eq!("Active".parse::<DocumentStatus>().unwrap(), DocumentStatus::Active);
        assert_eq!(" inactive ".parse::<DocumentStatus>().unwrap(), DocumentStatus::Inactive);
        assert!("deleted".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_ingest_status_round_trip() {
        for status in [IngestStatus::Queued, IngestStatus::AssetsUploaded, IngestStatus::Embedded] {
            assert_eq!(status.as_str().parse::<IngestStatus>().unwrap(), status);
        }
    }
}
