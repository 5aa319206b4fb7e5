//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible endpoints (text-embedding-3-small, text-embedding-3-large, ada-002)
//! - A deterministic hashed bag-of-words embedder for offline runs and tests

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::resilience::{CancelToken, Provider, ProviderPermits, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// A vector together with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub model: String,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text with `model`, or the configured default when `None`
    async fn embed(&self, text: &str, model: Option<&str>, cancel: &CancelToken) -> Result<Embedding>;

    /// Default model name
    fn model_name(&self) -> &str;

    /// Dimension produced by `model`
    fn dimension_for(&self, model: &str) -> usize;

    /// Dimension of the default model
    fn dimension(&self) -> usize {
        self.dimension_for(self.model_name())
    }
}

/// Known output sizes of OpenAI embedding models
pub fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

fn ensure_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(AppError::validation("text", "cannot embed empty or whitespace-only text"));
    }
    Ok(())
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    retry: RetryPolicy,
    permits: ProviderPermits,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(config: &EmbeddingConfig, permits: ProviderPermits) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;

        // Per-attempt timeout lives in the retry policy
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let dimension = known_dimension(&config.model).unwrap_or(config.dimension);

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            retry: config.retry_policy(),
            permits,
        })
    }

    async fn make_request(&self, text: &str, model: &str, cancel: &CancelToken) -> Result<Vec<f32>> {
        let _permit = self.permits.acquire(cancel).await?;
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: vec![text],
            model,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(AppError::EmbeddingError {
                    message: format!("API error {}: {}", status, body),
                });
            }
            return Err(AppError::UpstreamRejected {
                service: Provider::Embedding.as_str().to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        })?;

        let vector = result
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Empty response".to_string(),
            })?;

        let expected = self.dimension_for(model);
        if vector.len() != expected {
            return Err(AppError::EmbeddingError {
                message: format!(
                    "model {} returned {} dimensions, expected {}",
                    model,
                    vector.len(),
                    expected
                ),
            });
        }

        Ok(vector)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str, model: Option<&str>, cancel: &CancelToken) -> Result<Embedding> {
        ensure_text(text)?;
        let model = model.unwrap_or(self.model.as_str());
        let start = Instant::now();

        let result = self
            .retry
            .run(Provider::Embedding, cancel, |_| self.make_request(text, model, cancel))
            .await;

        metrics::record_embedding(start.elapsed().as_secs_f64(), model, result.is_ok());

        Ok(Embedding {
            vector: result?,
            model: model.to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension_for(&self, model: &str) -> usize {
        if model == self.model {
            self.dimension
        } else {
            known_dimension(model).unwrap_or(self.dimension)
        }
    }
}

/// Deterministic hashed bag-of-words embedder
///
/// Tokens are lowercased alphanumeric runs; each token's SHA-256 picks a bucket.
/// Vectors are non-negative and L2-normalized, so texts sharing no tokens sit at
/// cosine distance 1 barring bucket collisions.
pub struct HashEmbedder {
    model: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimension as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(token)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str, model: Option<&str>, cancel: &CancelToken) -> Result<Embedding> {
        ensure_text(text)?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled {
                operation: Provider::Embedding.as_str().to_string(),
            });
        }
        Ok(Embedding {
            vector: self.vectorize(text),
            model: model.unwrap_or(self.model.as_str()).to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension_for(&self, _model: &str) -> usize {
        self.dimension
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig, permits: ProviderPermits) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config, permits)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.model.clone(), config.dimension))),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_hash_embedder_dimension_and_determinism() {
        let embedder = HashEmbedder::new(DEFAULT_EMBEDDING_MODEL, 256);
        let cancel = CancelToken::new();
        let a = embedder.embed("Gentle cleanser twice daily", None, &cancel).await.unwrap();
        let b = embedder.embed("Gentle cleanser twice daily", None, &cancel).await.unwrap();
        assert_eq!(a.dimension(), 256);
        assert_eq!(a, b);
        assert_eq!(a.model, DEFAULT_EMBEDDING_MODEL);
    }

    #[tokio::test]
    async fn test_hash_embedder_similarity_tracks_overlap() {
        let embedder = HashEmbedder::new("hash", 1536);
        let cancel = CancelToken::new();
        let doc = embedder
            .embed("Rosacea treatment uses azelaic acid for rosacea flares", None, &cancel)
            .await
            .unwrap();
        let related = embedder.embed("rosacea treatment", None, &cancel).await.unwrap();
        let unrelated = embedder.embed("kernel scheduler", None, &cancel).await.unwrap();

        assert!(cosine(&doc.vector, &related.vector) > cosine(&doc.vector, &unrelated.vector));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected() {
        let embedder = HashEmbedder::new("hash", 8);
        let err = embedder.embed("   \n", None, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_openai_blank_text_makes_no_call() {
        let config = EmbeddingConfig {
            api_key: Some("sk-test".into()),
            // Unroutable; any network attempt would fail with a different error
            api_base: Some("http://127.0.0.1:9".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAIEmbedder::new(&config, ProviderPermits::new(1)).unwrap();
        let err = embedder.embed("", None, &CancelToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = EmbeddingConfig::default();
        assert!(matches!(
            OpenAIEmbedder::new(&config, ProviderPermits::new(1)),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_known_dimensions() {
        assert_eq!(known_dimension("text-embedding-3-small"), Some(1536));
        assert_eq!(known_dimension("text-embedding-3-large"), Some(3072));
        assert_eq!(known_dimension("custom"), None);
    }

    #[test]
    fn test_create_embedder_rejects_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "carrier-pigeon".into(),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config, ProviderPermits::new(1)).is_err());
    }
}
