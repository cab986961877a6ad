//! Configuration types.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::study::SurveyConfig;

/// Default Gemini model used for the bot.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

/// Process-level configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Gemini API key.
    pub api_key: SecretString,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Alternate Gemini endpoint (proxy or local stub).
    pub gemini_base_url: Option<String>,
    /// HTTP port for the API server.
    pub port: u16,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Survey links and completion codes.
    pub surveys: SurveyConfig,
    /// Response generator tuning.
    pub generator: GeneratorConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("GEMINI_API_KEY".to_string()))?;

        let model = env_or("GRAPH_GULLIBLE_MODEL", DEFAULT_MODEL);
        let gemini_base_url = std::env::var("GRAPH_GULLIBLE_GEMINI_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let port = parse_env("GRAPH_GULLIBLE_PORT", 8080u16)?;
        let db_path = PathBuf::from(env_or(
            "GRAPH_GULLIBLE_DB_PATH",
            "./data/graph-gullible.db",
        ));

        let generator = GeneratorConfig {
            max_output_tokens: parse_env("GRAPH_GULLIBLE_MAX_TOKENS", 400u32)?,
            temperature: parse_env("GRAPH_GULLIBLE_TEMPERATURE", 0.7f32)?,
            ..GeneratorConfig::default()
        };

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            gemini_base_url,
            port,
            db_path,
            surveys: SurveyConfig::from_env(),
            generator,
        })
    }
}

/// Tuning for the response generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Cap on model output tokens per turn.
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Guide mistakes after which the guide states the answer outright.
    pub escalation_threshold: u32,
    /// Word cap stated in the prompt.
    pub max_words: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 400,
            temperature: 0.7,
            escalation_threshold: 2,
            max_words: 35,
        }
    }
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
