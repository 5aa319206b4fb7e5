//! Chat model clients
//!
//! Provides:
//! - OpenAI-compatible chat completions with JSON-schema replies
//! - An offline template client that always answers with a basic routine
//! - A scripted client replaying canned replies for tests and demos

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::resilience::{CancelToken, Provider, ProviderPermits, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Client for a chat model that answers in JSON
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one system/user exchange and return the raw reply content.
    ///
    /// `images` are forwarded as image references alongside the user text.
    async fn chat_json(
        &self,
        system: &str,
        user: &str,
        schema: &serde_json::Value,
        images: &[String],
        cancel: &CancelToken,
    ) -> Result<String>;

    /// Model used for replies
    fn model_name(&self) -> &str;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI chat completions client
pub struct OpenAiLlmClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
    retry: RetryPolicy,
    permits: ProviderPermits,
}

impl OpenAiLlmClient {
    pub fn new(config: &LlmConfig, permits: ProviderPermits) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            retry: config.retry_policy(),
            permits,
        })
    }

    fn request_body(&self, system: &str, user: &str, schema: &serde_json::Value, images: &[String]) -> serde_json::Value {
        let user_content = if images.is_empty() {
            json!(user)
        } else {
            let mut parts = vec![json!({ "type": "text", "text": user })];
            parts.extend(
                images
                    .iter()
                    .map(|url| json!({ "type": "image_url", "image_url": { "url": url } })),
            );
            serde_json::Value::Array(parts)
        };

        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "routine_draft",
                    "schema": schema
                }
            },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user_content }
            ]
        })
    }

    async fn make_request(&self, body: &serde_json::Value, cancel: &CancelToken) -> Result<String> {
        let _permit = self.permits.acquire(cancel).await?;
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::LlmError {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(AppError::LlmError {
                    message: format!("API error {}: {}", status, body),
                });
            }
            return Err(AppError::UpstreamRejected {
                service: Provider::Llm.as_str().to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        let result: ChatResponse = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse response: {}", e),
        })?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::LlmError {
                message: "Chat response did not contain content".to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn chat_json(
        &self,
        system: &str,
        user: &str,
        schema: &serde_json::Value,
        images: &[String],
        cancel: &CancelToken,
    ) -> Result<String> {
        let body = self.request_body(system, user, schema, images);
        self.retry
            .run(Provider::Llm, cancel, |_| self.make_request(&body, cancel))
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline client answering every request with a conservative basic routine
pub struct TemplateLlmClient;

#[async_trait]
impl LlmClient for TemplateLlmClient {
    async fn chat_json(
        &self,
        _system: &str,
        _user: &str,
        _schema: &serde_json::Value,
        _images: &[String],
        cancel: &CancelToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled {
                operation: Provider::Llm.as_str().to_string(),
            });
        }

        let reply = json!({
            "description": "Basic routine: gentle cleansing, balanced moisturizing and daily sun protection. \
                            This is general guidance and does not replace a consultation with a dermatologist.",
            "target_skin_type": null,
            "target_conditions": [],
            "steps": [
                { "order": 1, "instruction": "Cleanse with a gentle, fragrance-free cleanser.", "time_of_day": "both", "frequency": "twice_daily" },
                { "order": 2, "instruction": "Apply a moisturizer suited to your skin type.", "time_of_day": "both", "frequency": "twice_daily" },
                { "order": 3, "instruction": "Apply broad-spectrum sunscreen SPF 30 or higher.", "time_of_day": "morning", "frequency": "daily" }
            ]
        });
        Ok(reply.to_string())
    }

    fn model_name(&self) -> &str {
        "template"
    }
}

/// Replays queued replies in order; an exhausted queue is a provider error
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<String>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    /// Queue replies that may include provider failures
    pub fn with_results(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// User prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat_json(
        &self,
        _system: &str,
        user: &str,
        _schema: &serde_json::Value,
        _images: &[String],
        cancel: &CancelToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled {
                operation: Provider::Llm.as_str().to_string(),
            });
        }

        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user.to_string());
        }

        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| {
            Err(AppError::LlmError {
                message: "no scripted reply left".to_string(),
            })
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Create a chat client based on configuration
pub fn create_llm_client(config: &LlmConfig, permits: ProviderPermits) -> Result<Arc<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiLlmClient::new(config, permits)?)),
        "template" => Ok(Arc::new(TemplateLlmClient)),
        other => Err(AppError::Configuration {
            message: format!("unknown llm provider '{}'", other),
        }),
    }
}
