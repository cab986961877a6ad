//! LLM integration for GraphGullible.
//!
//! Supports:
//! - **Gemini**: direct REST access with structured (JSON schema) output
//!
//! Everything above this module talks to the `LlmProvider` trait only.

pub mod gemini;
pub mod provider;

pub use gemini::GeminiProvider;
pub use provider::*;

use std::sync::Arc;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Override for the provider endpoint; `None` uses the public API.
    pub base_url: Option<String>,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Gemini => {
            tracing::info!("Using Gemini (model: {})", config.model);
            let mut provider = GeminiProvider::new(config.api_key.clone(), &config.model);
            if let Some(base_url) = &config.base_url {
                tracing::info!(base_url = %base_url, "Gemini endpoint overridden");
                provider = provider.with_base_url(base_url);
            }
            Ok(Arc::new(provider))
        }
    }
}
