//! Reply segmentation
//!
//! Splits the streamed LLM reply into synthesis-friendly segments without
//! blocking token delivery: a segment is flushed once the buffer reaches the
//! character budget or contains terminal punctuation, and the tail is
//! flushed when the stream ends.

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;

use pitchcall_core::{SessionEvent, HANGUP_MARKER};

/// Flush threshold in characters
pub const SEGMENT_CHAR_BUDGET: usize = 250;

static PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?…]+|\n").expect("punctuation regex"));

/// Message on the segment queue between the writer and the TTS consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SegMsg {
    Segment { text: String, is_final: bool },
    /// Terminator; always enqueued when the writer finishes
    End,
}

/// What the writer observed over the whole stream
#[derive(Debug, Default)]
pub struct SegmenterOutcome {
    /// Raw accumulated reply, marker included
    pub reply: String,
    /// The reply carried the hangup marker
    pub hangup: bool,
}

impl SegmenterOutcome {
    /// Reply as committed to history: marker stripped, trimmed
    pub fn reply_for_history(&self) -> String {
        strip_hangup(&self.reply).0
    }
}

/// Whether the accumulated buffer should be flushed to the queue
fn should_flush(buf: &str) -> bool {
    buf.chars().count() >= SEGMENT_CHAR_BUDGET || PUNCT.is_match(buf)
}

/// Remove the hangup marker; returns the cleaned text and whether it was seen
fn strip_hangup(text: &str) -> (String, bool) {
    if text.contains(HANGUP_MARKER) {
        (text.replace(HANGUP_MARKER, "").trim().to_string(), true)
    } else {
        (text.trim().to_string(), false)
    }
}

fn flush(buf: &mut String, seg_tx: &mpsc::UnboundedSender<SegMsg>, hangup: &mut bool) {
    let (text, saw_marker) = strip_hangup(buf);
    buf.clear();
    if saw_marker {
        *hangup = true;
    }
    if !text.is_empty() || saw_marker {
        let _ = seg_tx.send(SegMsg::Segment {
            text,
            is_final: saw_marker,
        });
    }
}

/// Consume the token stream: record every token into the reply buffer,
/// mirror it to the transport, and flush segments to the queue. The
/// terminator is always enqueued when the stream ends.
pub async fn segment_writer(
    mut token_rx: mpsc::Receiver<String>,
    seg_tx: mpsc::UnboundedSender<SegMsg>,
    events: mpsc::Sender<SessionEvent>,
) -> SegmenterOutcome {
    let mut outcome = SegmenterOutcome::default();
    let mut buf = String::new();
    let mut first_token_seen = false;

    while let Some(token) = token_rx.recv().await {
        if token.is_empty() {
            continue;
        }
        if !first_token_seen {
            first_token_seen = true;
            tracing::debug!("first reply token received");
        }

        outcome.reply.push_str(&token);
        let _ = events.send(SessionEvent::LlmToken(token.clone())).await;

        buf.push_str(&token);
        if should_flush(&buf) {
            flush(&mut buf, &seg_tx, &mut outcome.hangup);
        }
    }

    if !buf.trim().is_empty() || buf.contains(HANGUP_MARKER) {
        flush(&mut buf, &seg_tx, &mut outcome.hangup);
    }
    let _ = seg_tx.send(SegMsg::End);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_segmenter(tokens: &[&str]) -> (Vec<SegMsg>, SegmenterOutcome, Vec<String>) {
        let (token_tx, token_rx) = mpsc::channel(16);
        let (seg_tx, mut seg_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::channel(64);

        for token in tokens {
            token_tx.send(token.to_string()).await.unwrap();
        }
        drop(token_tx);

        let outcome = segment_writer(token_rx, seg_tx, event_tx).await;

        let mut segments = Vec::new();
        while let Ok(msg) = seg_rx.try_recv() {
            segments.push(msg);
        }
        let mut forwarded = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let SessionEvent::LlmToken(text) = event {
                forwarded.push(text);
            }
        }
        (segments, outcome, forwarded)
    }

    #[tokio::test]
    async fn test_flush_on_punctuation() {
        let (segments, outcome, forwarded) =
            run_segmenter(&["Sure", ", what", " is it?", " Go on"]).await;

        assert_eq!(
            segments,
            vec![
                SegMsg::Segment {
                    text: "Sure, what is it?".into(),
                    is_final: false
                },
                SegMsg::Segment {
                    text: "Go on".into(),
                    is_final: false
                },
                SegMsg::End,
            ]
        );
        assert_eq!(outcome.reply, "Sure, what is it? Go on");
        assert!(!outcome.hangup);
        assert_eq!(forwarded.len(), 4);
    }

    #[tokio::test]
    async fn test_flush_on_char_budget() {
        let long = "a".repeat(SEGMENT_CHAR_BUDGET);
        let (segments, _, _) = run_segmenter(&[&long]).await;
        assert_eq!(
            segments[0],
            SegMsg::Segment {
                text: long.clone(),
                is_final: false
            }
        );
    }

    #[tokio::test]
    async fn test_tail_flushed_on_stream_end() {
        let (segments, _, _) = run_segmenter(&["no terminal punctuation here"]).await;
        assert_eq!(segments.len(), 2);
        assert!(matches!(segments.last(), Some(SegMsg::End)));
    }

    #[tokio::test]
    async fn test_terminator_always_enqueued() {
        let (segments, _, _) = run_segmenter(&[]).await;
        assert_eq!(segments, vec![SegMsg::End]);
    }

    #[tokio::test]
    async fn test_hangup_marker_marks_final_segment() {
        let (segments, outcome, _) = run_segmenter(&["goodbye then ", "[HANGUP]"]).await;

        assert!(outcome.hangup);
        assert_eq!(outcome.reply_for_history(), "goodbye then");
        assert_eq!(
            segments,
            vec![
                SegMsg::Segment {
                    text: "goodbye then".into(),
                    is_final: true
                },
                SegMsg::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_hangup_after_punctuated_segment() {
        let (segments, outcome, _) = run_segmenter(&["fine, send it over!", " bye [HANGUP]"]).await;

        assert!(outcome.hangup);
        assert_eq!(segments.len(), 3);
        assert_eq!(
            segments[0],
            SegMsg::Segment {
                text: "fine, send it over!".into(),
                is_final: false
            }
        );
        assert_eq!(
            segments[1],
            SegMsg::Segment {
                text: "bye".into(),
                is_final: true
            }
        );
    }

    #[tokio::test]
    async fn test_newline_triggers_flush() {
        let (segments, _, _) = run_segmenter(&["line one\n", "line two"]).await;
        assert!(matches!(
            &segments[0],
            SegMsg::Segment { text, .. } if text == "line one"
        ));
    }
}
