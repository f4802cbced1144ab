//! Voice-activity detection parameters sent in the `start` frame

use serde::{Deserialize, Serialize};

/// VAD block of the recognizer's `start` config frame.
///
/// `events`/`event_hz` request the periodic voice-activity event stream the
/// barge-in arbiter depends on; leave them on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Speech probability cutoff (0..1)
    pub threshold: f32,
    /// Gap length that ends an utterance
    pub min_silence_ms: u32,
    /// Audio retained before/after detected speech
    pub speech_pad_ms: u32,
    /// Trailing silence before a final is emitted
    pub final_silence_s: f32,
    /// Minimum voiced duration before declaring speech onset
    pub start_trigger_ms: u32,
    /// Emission filter: minimum voiced milliseconds
    pub min_voiced_ms: u32,
    /// Emission filter: minimum characters
    pub min_chars: u32,
    /// Emission filter: minimum words
    pub min_words: u32,
    /// Amplitude-based extension window
    pub amp_extend: u32,
    /// Force a final after this many elapsed ms regardless of silence (0 = off)
    pub force_decode_ms: u32,
    /// Request the periodic VAD event stream
    pub events: bool,
    /// Event cadence in Hz
    pub event_hz: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            min_silence_ms: 50,
            speech_pad_ms: 350,
            final_silence_s: 0.05,
            start_trigger_ms: 150,
            min_voiced_ms: 100,
            min_chars: 1,
            min_words: 1,
            amp_extend: 600,
            force_decode_ms: 0,
            events: true,
            event_hz: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_requests_event_stream() {
        let vad = VadConfig::default();
        assert!(vad.events);
        assert_eq!(vad.event_hz, 8);
    }

    #[test]
    fn test_serializes_all_fields() {
        let value = serde_json::to_value(VadConfig::default()).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 12);
        assert_eq!(obj["threshold"], 0.6);
        assert_eq!(obj["min_silence_ms"], 50);
        assert_eq!(obj["force_decode_ms"], 0);
    }
}
