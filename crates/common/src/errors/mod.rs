//! Error types for the SkinCare RAG services
//!
//! Provides:
//! - One error enum shared by every pipeline stage
//! - Transient vs permanent classification driving retries
//! - HTTP status code mapping
//! - Structured error responses with machine-readable codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,
    RoutineNotFound,

    // Conflict errors (5xxx)
    EmbeddingModelMismatch,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    PersistenceError,

    // External service errors (8xxx)
    UpstreamError,
    UpstreamRejected,
    UpstreamExhausted,
    EmbeddingError,
    EmbeddingTimeout,
    LlmError,
    LlmTimeout,
    GenerationFailed,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    RequestCancelled,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,
            ErrorCode::RoutineNotFound => 4003,

            ErrorCode::EmbeddingModelMismatch => 5001,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::PersistenceError => 7003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::UpstreamRejected => 8002,
            ErrorCode::UpstreamExhausted => 8003,
            ErrorCode::EmbeddingError => 8004,
            ErrorCode::EmbeddingTimeout => 8005,
            ErrorCode::LlmError => 8006,
            ErrorCode::LlmTimeout => 8007,
            ErrorCode::GenerationFailed => 8008,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::RequestCancelled => 9004,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    #[error("Routine not found: {id}")]
    RoutineNotFound { id: String },

    // Corpus consistency
    #[error("Embedding model mismatch: corpus uses {expected}, got {actual}")]
    ModelMismatch { expected: String, actual: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    // External service errors (single attempt)
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Embedding timeout after {timeout_ms}ms")]
    EmbeddingTimeout { timeout_ms: u64 },

    #[error("Language model error: {message}")]
    LlmError { message: String },

    #[error("Language model timeout after {timeout_ms}ms")]
    LlmTimeout { timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("{service} rejected the request with status {status}: {message}")]
    UpstreamRejected {
        service: String,
        status: u16,
        message: String,
    },

    // External service errors (after retries)
    #[error("{service} unavailable after {attempts} attempts: {message}")]
    UpstreamExhausted {
        service: String,
        attempts: u32,
        message: String,
    },

    #[error("Routine generation failed after {attempts} attempts: {message}")]
    GenerationFailed { message: String, attempts: u32 },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request cancelled during {operation}")]
    Cancelled { operation: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error on a named field
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::DocumentNotFound { .. } => ErrorCode::DocumentNotFound,
            AppError::RoutineNotFound { .. } => ErrorCode::RoutineNotFound,
            AppError::ModelMismatch { .. } => ErrorCode::EmbeddingModelMismatch,
            AppError::Database(_) | AppError::Sqlx(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Persistence { .. } => ErrorCode::PersistenceError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::EmbeddingTimeout { .. } => ErrorCode::EmbeddingTimeout,
            AppError::LlmError { .. } => ErrorCode::LlmError,
            AppError::LlmTimeout { .. } => ErrorCode::LlmTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::UpstreamRejected { .. } => ErrorCode::UpstreamRejected,
            AppError::UpstreamExhausted { .. } => ErrorCode::UpstreamExhausted,
            AppError::GenerationFailed { .. } => ErrorCode::GenerationFailed,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Cancelled { .. } => ErrorCode::RequestCancelled,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::MissingField { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::DocumentNotFound { .. }
            | AppError::RoutineNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::ModelMismatch { .. } => StatusCode::CONFLICT,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::Sqlx(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Persistence { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. }
            | AppError::LlmError { .. }
            | AppError::HttpClient(_)
            | AppError::UpstreamRejected { .. }
            | AppError::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            AppError::EmbeddingTimeout { .. } | AppError::LlmTimeout { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 503 Service Unavailable
            AppError::UpstreamExhausted { .. }
            | AppError::Cancelled { .. }
            | AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether a single failed provider attempt may succeed if repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::EmbeddingError { .. }
                | AppError::EmbeddingTimeout { .. }
                | AppError::LlmError { .. }
                | AppError::LlmTimeout { .. }
                | AppError::HttpClient(_)
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation {
                field: Some(field), ..
            } => Some(serde_json::json!({ "field": field })),
            AppError::UpstreamExhausted {
                service, attempts, ..
            } => Some(serde_json::json!({ "service": service, "attempts": attempts })),
            AppError::GenerationFailed { attempts, .. } => {
                Some(serde_json::json!({ "attempts": attempts }))
            }
            AppError::ModelMismatch { expected, actual } => {
                Some(serde_json::json!({ "expected": expected, "actual": actual }))
            }
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: self.details(),
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
