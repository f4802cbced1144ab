//! Streaming speech-recognition client
//!
//! Auth flow:
//! 1. POST the API key to the token service to obtain a short-lived
//!    streaming token.
//! 2. Connect to the streaming WebSocket with `?streaming_token=<jwt>`
//!    (the API key never travels on the socket).
//!
//! The first outbound frame is a `start` config message; PCM follows as
//! binary frames once the server answers `ready`. Close is announced with
//! `{"type":"eos"}`.

pub mod client;
pub mod vad;

pub use client::{AsrClient, AsrConfig, Eagerness, ThoughtDetection};
pub use vad::VadConfig;

use thiserror::Error;

/// Recognizer errors
#[derive(Error, Debug)]
pub enum AsrError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Server did not signal readiness in time")]
    ReadyTimeout,

    #[error("Link already open")]
    AlreadyOpen,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for AsrError {
    fn from(err: reqwest::Error) -> Self {
        AsrError::Auth(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AsrError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AsrError::Transport(err.to_string())
    }
}

impl From<AsrError> for pitchcall_core::Error {
    fn from(err: AsrError) -> Self {
        pitchcall_core::Error::Asr(err.to_string())
    }
}
