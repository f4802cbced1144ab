//! Transport protocol frames
//!
//! JSON text frames exchanged with the browser client over the WebSocket.
//! Raw VAD/utterance events from the recognizer are passed through verbatim
//! and are not part of these enums; binary frames carry PCM in both
//! directions.

use serde::{Deserialize, Serialize};

/// Trailing token the model may emit to signal end-of-call
pub const HANGUP_MARKER: &str = "[HANGUP]";

/// Persona selected by the client at session start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PersonaId {
    #[default]
    A,
    B,
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersonaId::A => write!(f, "A"),
            PersonaId::B => write!(f, "B"),
        }
    }
}

/// Messages from the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin the session with the chosen persona; idempotent once started
    Start {
        #[serde(default)]
        persona: PersonaId,
    },
    /// Graceful shutdown
    Stop,
    /// Acknowledges that the final audio of a hangup turn finished playing
    FinalAudioComplete,
}

/// Messages to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Lifecycle status: "connected", "initializing", "ready", "error: ..."
    Status { message: String },
    /// A committed user utterance
    AsrFinal { text: String },
    /// One streamed reply token
    LlmToken { text: String },
    /// End of one synthesized segment; `is_final` marks the hangup segment
    SegmentDone { is_final: bool },
    /// First audio block of a segment is about to arrive
    AudioStart,
    /// The assistant turn completed
    TurnDone,
    /// Model-initiated end of call
    Hangup {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Session terminated
    Done,
}

impl ServerEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ServerEvent::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        ServerEvent::Status {
            message: format!("error: {}", message),
        }
    }
}
