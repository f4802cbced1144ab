//! Core types and traits for the voice mediator
//!
//! This crate provides the foundational types shared by all other crates:
//! - Transport protocol messages (client and server frames)
//! - Session events emitted by the engine towards the transport
//! - Conversation history with dedupe and bounded length
//! - Seam traits for the three upstream clients (ASR, LLM, TTS)
//! - Error types

pub mod conversation;
pub mod error;
pub mod protocol;
pub mod traits;

pub use conversation::{ChatRole, ChatTurn, History, MAX_HISTORY_TURNS};
pub use error::{Error, Result};
pub use protocol::{ClientMessage, PersonaId, ServerEvent, HANGUP_MARKER};
pub use traits::{AsrEvent, ReplyStream, SessionEvent, SpeechRecognizer, SpeechSynthesizer};
