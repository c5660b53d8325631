//! Application configuration.
//!
//! Centralizes the settings for the interview service, loaded from the
//! environment once at startup.

use std::env;
use tracing::Level;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub chat_model: String,
    pub transcribe_model: String,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `OPENAI_API_KEY`: Secret key for the exchange and transcription APIs. Required.
    // *   `CHAT_MODEL`: (Optional) Model for the interviewer exchange. Defaults to "gpt-4o".
    // *   `TRANSCRIBE_MODEL`: (Optional) Model for speech capture. Defaults to "gpt-4o-transcribe".
    // *   `RUST_LOG`: (Optional) Logging level, defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Useful for local development, ignored if not present.
        dotenvy::dotenv().ok();

        let openai_api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_model = env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let transcribe_model =
            env::var("TRANSCRIBE_MODEL").unwrap_or_else(|_| "gpt-4o-transcribe".to_string());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            openai_api_key,
            chat_model,
            transcribe_model,
            log_level,
        })
    }
}
