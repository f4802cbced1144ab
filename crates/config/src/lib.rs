//! Configuration management for the voice mediator
//!
//! Supports loading configuration from:
//! - `config/default.toml` (optional)
//! - Environment variables (`PITCHCALL` prefix, `__` section separator)
//!
//! The server binary loads `.env` before settings are read, so deployments
//! can keep upstream credentials out of the shell environment.

pub mod settings;

pub use settings::{
    load_settings, AsrSettings, LlmSettings, ObservabilityConfig, ServerConfig, SessionSettings,
    Settings, TtsSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
