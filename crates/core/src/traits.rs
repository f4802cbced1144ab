//! Seam traits for the upstream streaming clients
//!
//! The session engine holds its clients through these traits so the turn
//! logic can be exercised against in-memory fakes. Streamed values travel on
//! `tokio::sync::mpsc` receivers; a closed channel marks end-of-stream.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::conversation::ChatTurn;
use crate::error::Result;

/// Events surfaced by a speech recognizer once its link is open.
///
/// `ready` is consumed internally by the client's readiness latch; partial
/// transcripts are discarded at the source.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    /// Raw voice-activity or utterance-boundary event, forwarded verbatim
    Vad(serde_json::Value),
    /// A committed final transcript (non-empty, trimmed)
    Final(String),
}

/// Events emitted by the session engine towards the transport adapter
#[derive(Debug, Clone)]
pub enum SessionEvent {
    AsrFinal(String),
    LlmToken(String),
    /// First PCM block of a segment is about to follow
    AudioStart,
    /// Synthesized PCM for the client (48 kHz, 16-bit LE, mono)
    AudioChunk(Vec<u8>),
    SegmentDone { is_final: bool },
    TurnDone,
    /// Raw VAD/utterance passthrough
    Vad(serde_json::Value),
    /// The reply carried the hangup marker; the transport ends the call
    Hangup,
}

/// Duplex streaming speech recognizer
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Authenticate, connect, configure, and wait for readiness.
    /// The returned receiver carries recognition events until the peer or
    /// `close` ends the link.
    async fn open(&self) -> Result<mpsc::Receiver<AsrEvent>>;

    /// Stream one PCM frame. Blocks until the link is ready; errors after
    /// readiness are logged and swallowed.
    async fn send_pcm(&self, pcm: Vec<u8>);

    /// Announce end-of-stream and tear the link down.
    async fn close(&self);
}

/// Streaming chat reply generator for one turn
#[async_trait]
pub trait ReplyStream: Send + Sync {
    /// Start a streaming completion for `user_text` on top of `history`.
    /// The receiver yields non-empty token deltas in generation order.
    async fn stream_reply(
        &self,
        user_text: &str,
        history: &[ChatTurn],
    ) -> Result<mpsc::Receiver<String>>;

    /// Close any in-flight stream promptly; further yields cease.
    async fn cancel(&self);
}

/// Streaming speech synthesizer
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one text segment. The receiver yields raw PCM blocks;
    /// whitespace-only input yields an immediately closed receiver.
    async fn synthesize(&self, text: &str) -> Result<mpsc::Receiver<Vec<u8>>>;

    /// Abort the active synthesis, if any.
    async fn stop(&self);

    /// Release the connection pool.
    async fn close(&self);
}
