//! Chat-completion integration
//!
//! Features:
//! - Streaming token generation over an OpenAI-compatible endpoint
//! - In-flight cancellation for barge-in
//! - Persona registry (buyer personas conditioned per session)
//! - Post-call scorecard evaluation

pub mod client;
pub mod feedback;
pub mod persona;

pub use client::{ChatClient, LlmConfig};
pub use feedback::{evaluate_call, Scorecard};
pub use persona::{persona_prompt, PersonaConfig};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for pitchcall_core::Error {
    fn from(err: LlmError) -> Self {
        pitchcall_core::Error::Llm(err.to_string())
    }
}
