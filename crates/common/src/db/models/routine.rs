//! Persisted routine header

use crate::errors::AppError;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Publication state of a saved routine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStatus {
    Draft,
    Published,
    Archived,
}

impl RoutineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineStatus::Draft => "draft",
            RoutineStatus::Published => "published",
            RoutineStatus::Archived => "archived",
        }
    }
}

impl FromStr for RoutineStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(RoutineStatus::Draft),
            "published" => Ok(RoutineStatus::Published),
            "archived" => Ok(RoutineStatus::Archived),
            other => Err(AppError::validation(
                "status",
                format!("invalid routine status '{}'", other),
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub routine_id: Uuid,

    pub owner_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub description: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub target_skin_type: Option<String>,

    /// Comma-joined condition list
    #[sea_orm(column_type = "Text", nullable)]
    pub target_conditions: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub routine_type: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub source: String,

    pub is_rag_based: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
