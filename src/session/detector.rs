//! # Utterance Detector
//!
//! Consumes streaming transcription events and decides where utterances
//! begin and end. One detector exists per session.
//!
//! ## Detection Rules:
//! - The first non-empty transcript chunk since the last completion flips
//!   the detector into the speaking state and emits [`UtteranceSignal::Started`]
//!   exactly once per utterance.
//! - Only *final* chunks are accumulated into the transcript buffer, trimmed
//!   and joined with a single space.
//! - An utterance completes when the provider flags `speech_final` on a
//!   final chunk, or when an utterance-end marker arrives while speaking.
//! - An utterance-end marker while not speaking is a no-op (the utterance
//!   already completed via `speech_final`, or never started).

use crate::protocol::UtteranceReason;

/// Signals emitted by the detector as transcription events arrive.
#[derive(Debug, Clone, PartialEq)]
pub enum UtteranceSignal {
    /// The user started speaking. Fired once per speaking episode; the
    /// interruption coordinator keys off this.
    Started,
    /// The user finished an utterance.
    Completed {
        /// Space-joined, trimmed concatenation of all final chunks
        transcript: String,
        /// Which provider signal ended the utterance
        reason: UtteranceReason,
        /// Provider timestamp of the last word (seconds), for utterance-end
        last_word_end: Option<f64>,
    },
}

/// Speaking/silence state machine for one session.
#[derive(Debug, Default)]
pub struct UtteranceDetector {
    speaking: bool,
    buffer: String,
}

impl UtteranceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feed one transcript event from the transcription provider.
    ///
    /// Returns the signals this event produced, in order. A single event can
    /// produce both `Started` and `Completed` (a one-chunk utterance with
    /// `speech_final` set).
    pub fn on_transcript(
        &mut self,
        text: &str,
        is_final: bool,
        speech_final: bool,
    ) -> Vec<UtteranceSignal> {
        let text = text.trim();
        if text.is_empty() {
            // Interim silence results carry no information
            return Vec::new();
        }

        let mut signals = Vec::new();

        if !self.speaking {
            self.speaking = true;
            signals.push(UtteranceSignal::Started);
        }

        if is_final {
            if !self.buffer.is_empty() {
                self.buffer.push(' ');
            }
            self.buffer.push_str(text);
        }

        if speech_final {
            signals.push(self.complete(UtteranceReason::SpeechFinal, None));
        }

        signals
    }

    /// Feed an utterance-end marker from the transcription provider.
    pub fn on_utterance_end(&mut self, last_word_end: Option<f64>) -> Option<UtteranceSignal> {
        if !self.speaking {
            return None;
        }
        Some(self.complete(UtteranceReason::UtteranceEnd, last_word_end))
    }

    fn complete(&mut self, reason: UtteranceReason, last_word_end: Option<f64>) -> UtteranceSignal {
        let transcript = std::mem::take(&mut self.buffer).trim().to_string();
        self.speaking = false;
        UtteranceSignal::Completed {
            transcript,
            reason,
            last_word_end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_fires_once_per_episode() {
        let mut detector = UtteranceDetector::new();

        let first = detector.on_transcript("hello", false, false);
        assert_eq!(first, vec![UtteranceSignal::Started]);

        // Further chunks in the same episode do not re-fire Started
        assert!(detector.on_transcript("hello there", false, false).is_empty());
        assert!(detector.on_transcript("hello there friend", true, false).is_empty());
        assert!(detector.is_speaking());
    }

    #[test]
    fn test_final_chunks_join_with_single_space() {
        let mut detector = UtteranceDetector::new();

        detector.on_transcript("  good morning ", true, false);
        detector.on_transcript("ignored interim", false, false);
        let signals = detector.on_transcript(" how are you ", true, true);

        assert_eq!(
            signals,
            vec![UtteranceSignal::Completed {
                transcript: "good morning how are you".to_string(),
                reason: UtteranceReason::SpeechFinal,
                last_word_end: None,
            }]
        );
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_single_chunk_utterance_starts_and_completes() {
        let mut detector = UtteranceDetector::new();
        let signals = detector.on_transcript("yes", true, true);

        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0], UtteranceSignal::Started);
        assert!(matches!(
            &signals[1],
            UtteranceSignal::Completed { transcript, .. } if transcript == "yes"
        ));
    }

    #[test]
    fn test_utterance_end_completes_while_speaking() {
        let mut detector = UtteranceDetector::new();
        detector.on_transcript("so anyway", true, false);

        let signal = detector.on_utterance_end(Some(3.21));
        assert_eq!(
            signal,
            Some(UtteranceSignal::Completed {
                transcript: "so anyway".to_string(),
                reason: UtteranceReason::UtteranceEnd,
                last_word_end: Some(3.21),
            })
        );
    }

    #[test]
    fn test_utterance_end_while_silent_is_noop() {
        let mut detector = UtteranceDetector::new();
        assert_eq!(detector.on_utterance_end(None), None);

        // Also after a speech_final already closed the utterance
        detector.on_transcript("done now", true, true);
        assert_eq!(detector.on_utterance_end(Some(1.0)), None);
    }

    #[test]
    fn test_empty_chunks_are_ignored() {
        let mut detector = UtteranceDetector::new();
        assert!(detector.on_transcript("", false, false).is_empty());
        assert!(detector.on_transcript("   ", true, true).is_empty());
        assert!(!detector.is_speaking());
    }

    #[test]
    fn test_new_episode_after_completion() {
        let mut detector = UtteranceDetector::new();
        detector.on_transcript("first utterance", true, true);

        let signals = detector.on_transcript("second", false, false);
        assert_eq!(signals, vec![UtteranceSignal::Started]);
    }
}
