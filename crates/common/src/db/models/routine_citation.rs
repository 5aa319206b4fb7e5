//! Chunk that grounded a saved routine

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routine_citations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub citation_id: Uuid,

    pub routine_id: Uuid,

    pub doc_id: Uuid,

    pub chunk_id: Uuid,

    pub score: f64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
