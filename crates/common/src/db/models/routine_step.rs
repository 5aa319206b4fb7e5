//! Persisted routine step

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "routine_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub step_id: Uuid,

    pub routine_id: Uuid,

    pub step_order: i32,

    #[sea_orm(column_type = "Text")]
    pub instruction: String,

    #[sea_orm(column_type = "Text")]
    pub time_of_day: String,

    #[sea_orm(column_type = "Text")]
    pub frequency: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
