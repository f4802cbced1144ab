//! Conversation history types

use serde::{Deserialize, Serialize};

/// Upper bound on retained history entries
pub const MAX_HISTORY_TURNS: usize = 64;

/// Speaker role in the dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One dialogue entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Rolling dialogue history, bounded to the most recent entries.
///
/// The history is alternating-friendly but not strictly alternating; a user
/// entry identical to the current tail is suppressed so that debounced or
/// re-committed finals never duplicate.
#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<ChatTurn>,
    max_turns: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_TURNS)
    }

    pub fn with_capacity(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns,
        }
    }

    /// Append a user entry unless the tail already holds the same text.
    /// Returns whether an entry was appended.
    pub fn push_user(&mut self, text: &str) -> bool {
        if matches!(self.turns.last(), Some(t) if t.role == ChatRole::User && t.content == text) {
            return false;
        }
        self.turns.push(ChatTurn::user(text));
        self.enforce_cap();
        true
    }

    /// Append a completed assistant reply. Empty replies are ignored.
    pub fn push_assistant(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.turns.push(ChatTurn::assistant(text));
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }

    /// Snapshot of the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<ChatTurn> {
        self.turns.clone()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_user_dedupes_tail() {
        let mut history = History::new();
        assert!(history.push_user("hello"));
        assert!(!history.push_user("hello"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_push_user_allows_repeat_after_assistant() {
        let mut history = History::new();
        history.push_user("hello");
        history.push_assistant("hi there");
        assert!(history.push_user("hello"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_push_assistant_skips_empty() {
        let mut history = History::new();
        history.push_assistant("");
        assert!(history.is_empty());
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = History::with_capacity(4);
        for i in 0..6 {
            history.push_user(&format!("u{}", i));
            history.push_assistant(&format!("a{}", i));
        }
        assert_eq!(history.len(), 4);
        let snapshot = history.snapshot();
        assert_eq!(snapshot[0].content, "u4");
        assert_eq!(snapshot[3].content, "a5");
    }

    #[test]
    fn test_never_exceeds_max() {
        let mut history = History::new();
        for i in 0..200 {
            history.push_user(&format!("turn {}", i));
        }
        assert!(history.len() <= MAX_HISTORY_TURNS);
    }
}
