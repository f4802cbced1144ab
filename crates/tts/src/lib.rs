//! Streaming speech-synthesis client
//!
//! One segment per request: the response body is newline-delimited JSON
//! where each line may carry a base64 WAV slice. The RIFF header is
//! stripped and the raw PCM forwarded block by block so playback can begin
//! before synthesis finishes.

pub mod client;

pub use client::{SpeechClient, TtsConfig};

use thiserror::Error;

/// Synthesizer errors
#[derive(Error, Debug)]
pub enum TtsError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,
}

impl From<reqwest::Error> for TtsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TtsError::Timeout
        } else {
            TtsError::Network(err.to_string())
        }
    }
}

impl From<TtsError> for pitchcall_core::Error {
    fn from(err: TtsError) -> Self {
        pitchcall_core::Error::Tts(err.to_string())
    }
}
