//! Per-connection session engine
//!
//! Couples the three upstream streaming clients into one turn-taking loop:
//! microphone PCM flows through a bounded drop-oldest queue into the
//! recognizer; committed finals seed LLM turns; reply tokens are segmented
//! and synthesized while voice-activity events arm the barge-in arbiter
//! that can cancel the whole turn mid-flight.

pub mod engine;
pub mod queue;
pub mod segmenter;

pub use engine::{SessionConfig, SessionEngine, SessionState};
pub use queue::InputQueue;
