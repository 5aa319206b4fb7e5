//! SkinCare RAG Common Library
//!
//! Shared code for the gateway and ingestion binaries including:
//! - Database models, the document catalog and the routine draft writer
//! - Chunking, embedding and vector search
//! - Prompt assembly, generation and draft validation
//! - Error types and handling
//! - Configuration management
//! - Metrics and resilience primitives

pub mod config;
pub mod context;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod ingest;
pub mod metrics;
pub mod resilience;
pub mod retrieval;
pub mod routine;
pub mod services;
pub mod vector;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use embeddings::{Embedder, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL};
pub use errors::{AppError, Result};
pub use resilience::{CancelOnDrop, CancelToken};
pub use services::RagServices;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
