//! Configuration management for the SkinCare RAG services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::context::MAX_PARSE_ATTEMPTS;
use crate::errors::{AppError, Result};
use crate::resilience::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval and generation knobs
    #[serde(default)]
    pub rag: RagConfig,

    /// Chunking defaults
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Ingestion worker pool
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes). Empty selects the in-memory stores.
    #[serde(default)]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply bundled migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hash
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use when a request does not name one
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension of the default model
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Attempts per call, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Outstanding provider requests allowed process-wide
    #[serde(default = "default_provider_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat provider: openai, template
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key for the chat service
    pub api_key: Option<String>,

    /// API base URL
    pub api_base: Option<String>,

    /// Chat model
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_tokens: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Attempts per call, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RagConfig {
    /// Default result count for plain search
    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    /// Default retained chunk count for routine generation
    #[serde(default = "default_generation_k")]
    pub generation_k: usize,

    /// Upper clamp for any requested k
    #[serde(default = "default_max_k")]
    pub max_k: usize,

    /// Minimum similarity a chunk needs to ground a routine
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    /// Character budget for the assembled user prompt
    #[serde(default = "default_prompt_budget")]
    pub prompt_budget_chars: usize,

    /// Default step cap for generated routines
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Hard ceiling on requested steps
    #[serde(default = "default_max_steps_limit")]
    pub max_steps_limit: usize,

    /// Validated routines must have at least this many steps
    #[serde(default = "default_min_steps")]
    pub min_steps: usize,

    /// Source filter applied to plain search when the caller gives none
    #[serde(default = "default_sources")]
    pub default_sources: Vec<String>,

    /// Caller-supplied context is cut to this many characters
    #[serde(default = "default_additional_context_chars")]
    pub additional_context_chars: usize,

    /// Image references forwarded to the model
    #[serde(default = "default_max_image_urls")]
    pub max_image_urls: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Smallest chunk size accepted from callers
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// How far a boundary may move to land on a sentence break
    #[serde(default = "default_boundary_tolerance")]
    pub boundary_tolerance: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Concurrent chunk embeddings per document
    #[serde(default = "default_ingestion_concurrency")]
    pub max_concurrency: usize,

    /// File extensions whose extracted text becomes document content
    #[serde(default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 600 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_provider_timeout() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 5_000 }
fn default_provider_concurrency() -> usize { 8 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_chat_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_max_output_tokens() -> u32 { 1_200 }
fn default_llm_timeout() -> u64 { 60 }
fn default_search_top_k() -> usize { 6 }
fn default_generation_k() -> usize { 12 }
fn default_max_k() -> usize { 50 }
fn default_min_similarity() -> f64 { 0.6 }
fn default_prompt_budget() -> usize { 12_000 }
fn default_max_steps() -> usize { 12 }
fn default_max_steps_limit() -> usize { 20 }
fn default_min_steps() -> usize { 1 }
fn default_sources() -> Vec<String> { vec!["guideline:vn-2024".to_string(), "faq".to_string()] }
fn default_additional_context_chars() -> usize { 6_000 }
fn default_max_image_urls() -> usize { 5 }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 150 }
fn default_min_chunk_size() -> usize { 200 }
fn default_boundary_tolerance() -> usize { 100 }
fn default_ingestion_concurrency() -> usize { 4 }
fn default_text_extensions() -> Vec<String> {
    [".txt", ".md", ".markdown", ".pdf", ".doc", ".docx", ".csv", ".tsv", ".xlsx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "skincare-rag".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__RAG__MIN_SIMILARITY=0.65
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject combinations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size <= self.chunking.chunk_overlap {
            return Err(AppError::Configuration {
                message: format!(
                    "chunking.chunk_size ({}) must exceed chunking.chunk_overlap ({})",
                    self.chunking.chunk_size, self.chunking.chunk_overlap
                ),
            });
        }
        if self.embedding.max_concurrency == 0 || self.ingestion.max_concurrency == 0 {
            return Err(AppError::Configuration {
                message: "concurrency limits must be at least 1".to_string(),
            });
        }
        if self.embedding.max_attempts == 0 || self.llm.max_attempts == 0 {
            return Err(AppError::Configuration {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        let budget = self.generation_budget();
        if self.request_timeout() < budget {
            return Err(AppError::Configuration {
                message: format!(
                    "server.request_timeout_secs ({}) is shorter than the worst-case generation time ({}s)",
                    self.server.request_timeout_secs,
                    budget.as_secs()
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.rag.min_similarity) {
            return Err(AppError::Configuration {
                message: format!(
                    "rag.min_similarity must be within [0, 1], got {}",
                    self.rag.min_similarity
                ),
            });
        }
        Ok(())
    }

    /// Longest a routine generation can take with every retry spent: one query
    /// embedding plus a chat call per parse attempt
    pub fn generation_budget(&self) -> Duration {
        self.embedding.retry_policy().worst_case() + self.llm.retry_policy().worst_case() * MAX_PARSE_ATTEMPTS
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Whether a PostgreSQL database is configured
    pub fn uses_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            attempt_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            attempt_timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_provider_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_concurrency: default_provider_concurrency(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            search_top_k: default_search_top_k(),
            generation_k: default_generation_k(),
            max_k: default_max_k(),
            min_similarity: default_min_similarity(),
            prompt_budget_chars: default_prompt_budget(),
            max_steps: default_max_steps(),
            max_steps_limit: default_max_steps_limit(),
            min_steps: default_min_steps(),
            default_sources: default_sources(),
            additional_context_chars: default_additional_context_chars(),
            max_image_urls: default_max_image_urls(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            boundary_tolerance: default_boundary_tolerance(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_ingestion_concurrency(),
            text_extensions: default_text_extensions(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            rag: RagConfig::default(),
            chunking: ChunkingConfig::default(),
            ingestion: IngestionConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimension, 1536);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.rag.search_top_k, 6);
        assert_eq!(config.rag.generation_k, 12);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_read_database_fallback() {
        let mut config = AppConfig::default();
        assert!(!config.uses_database());
        config.database.url = "postgres://localhost/skincare".to_string();
        assert!(config.uses_database());
        assert_eq!(config.read_database_url(), "postgres://localhost/skincare");
    }

    #[test]
    fn test_validate_rejects_bad_chunking() {
        let mut config = AppConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_threshold_out_of_range() {
        let mut config = AppConfig::default();
        config.rag.min_similarity = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_below_generation_budget() {
        let mut config = AppConfig::default();
        // 3 x 30s + 2 x 5s for the query embedding, twice 3 x 60s + 2 x 5s for chat
        assert_eq!(config.generation_budget(), Duration::from_secs(480));
        assert!(config.request_timeout() >= config.generation_budget());

        config.server.request_timeout_secs = 120;
        assert!(matches!(
            config.validate(),
            Err(AppError::Configuration { .. })
        ));

        config.llm.timeout_secs = 10;
        config.llm.max_attempts = 2;
        config.embedding.timeout_secs = 10;
        config.embedding.max_attempts = 2;
        assert!(config.generation_budget() <= Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = AppConfig::default();
        let policy = config.embedding.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(30));
    }
}
