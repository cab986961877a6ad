//! Error types for GraphGullible.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Study error: {0}")]
    Study(#[from] StudyError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the response generator. All of them are recovered by the
/// conversation controller with the fallback reply.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Malformed decision: {0}")]
    Malformed(String),

    #[error("Guide persona returned in tutorial mode")]
    GuideInTutorial,
}

/// Study protocol errors (email gate, dashboard, survey codes).
#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Dashboard step {step} is locked")]
    StepLocked { step: String },

    #[error("Invalid completion code for {kind} survey")]
    InvalidCode { kind: String },

    #[error("Unknown survey kind: {0}")]
    UnknownSurvey(String),
}

/// Chat module errors surfaced to the presentation layer.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Scenario is not completed yet (step {step})")]
    NotCompleted { step: String },

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("No active chat for participant {0}")]
    NoActiveChat(String),

    #[error("Chat module is not finished yet")]
    ModuleNotFinished,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
