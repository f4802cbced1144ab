//! Shared error type

use thiserror::Error;

/// Top-level error for the voice mediator
#[derive(Error, Debug)]
pub enum Error {
    #[error("ASR error: {0}")]
    Asr(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result alias using the shared error
pub type Result<T> = std::result::Result<T, Error>;
