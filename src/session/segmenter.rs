//! # Sentence Segmenter
//!
//! Buffers the streaming token output of the language model and cuts it
//! into speakable sentence segments for the synthesis dispatcher.
//!
//! ## Segmentation Rules:
//! - A segment ends at the earliest `.` or `?` in the buffer; the
//!   terminator stays with the segment and the remainder is carried
//!   forward.
//! - At most one segment is produced per pushed token. If one token
//!   carries several terminators, later sentences surface as subsequent
//!   tokens arrive (or at flush time).
//! - Abbreviations, decimals, and `!` are not treated specially. That is a
//!   documented limitation of the split set, not a bug.

/// Characters that terminate a speakable segment.
const SENTENCE_TERMINATORS: [char; 2] = ['.', '?'];

/// Streaming sentence splitter for one generation turn.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one token and split off the first complete sentence, if any.
    pub fn push_token(&mut self, token: &str) -> Option<String> {
        self.buffer.push_str(token);

        let idx = self.buffer.find(SENTENCE_TERMINATORS)?;
        // Terminators are ASCII, so idx + 1 is a char boundary
        let segment = self.buffer[..=idx].to_string();
        self.buffer = self.buffer[idx + 1..].to_string();
        Some(segment)
    }

    /// Drain whatever is left at end of generation.
    ///
    /// Returns the remainder as the final segment when it holds any
    /// non-whitespace text, clearing the buffer either way.
    pub fn flush(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.trim().is_empty() {
            None
        } else {
            Some(remainder)
        }
    }

    /// Discard buffered text (used when an interruption aborts the turn).
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
