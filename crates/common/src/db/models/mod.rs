//! SeaORM entity models
//!
//! Flat tables keyed by their own ids; cross-table links are plain foreign-key
//! columns resolved with explicit queries. Chunk and audit tables carry pgvector
//! columns and are accessed through `vector::PgVectorStore` instead.

mod document;
mod document_asset;
mod routine;
mod routine_citation;
mod routine_step;

pub use document::{
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    DocumentStatus,
    Entity as DocumentEntity,
    IngestStatus,
    Model as Document,
};

pub use document_asset::{
    ActiveModel as DocumentAssetActiveModel,
    Column as DocumentAssetColumn,
    Entity as DocumentAssetEntity,
    Model as DocumentAsset,
};

pub use routine::{
    ActiveModel as RoutineActiveModel,
    Column as RoutineColumn,
    Entity as RoutineEntity,
    Model as Routine,
    RoutineStatus,
};

pub use routine_step::{
    ActiveModel as RoutineStepActiveModel,
    Column as RoutineStepColumn,
    Entity as RoutineStepEntity,
    Model as RoutineStep,
};

pub use routine_citation::{
    ActiveModel as RoutineCitationActiveModel,
    Column as RoutineCitationColumn,
    Entity as RoutineCitationEntity,
    Model as RoutineCitation,
};
