//! # Client Protocol
//!
//! Defines the JSON message envelope exchanged with the browser client over
//! the `/ws` connection. Both directions use the same framing:
//!
//! ```json
//! { "type": "<event name>", "data": { ... } }
//! ```
//!
//! Text frames carry these envelopes as newline-free JSON; binary frames on
//! the same connection carry raw 16-bit PCM audio and are never valid JSON,
//! which is how the two are distinguished.
//!
//! ## Protocol Flow:
//! 1. Client connects and sends `initialize`
//! 2. Server replies `initialized` once the providers are connected
//! 3. Client streams binary audio frames
//! 4. Server streams `speech_*`, `llm_*`, and `tts_*` events back

use serde::{Deserialize, Serialize};

/// Messages the client sends as JSON text frames.
///
/// Everything that is not one of these is expected to be a binary audio
/// frame; unparseable text frames are logged and dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Begin provider setup for this session. No payload.
    Initialize,
}

/// Why an utterance was considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceReason {
    /// The transcription provider flagged `speech_final` on a final chunk.
    SpeechFinal,
    /// The transcription provider emitted an utterance-end marker.
    UtteranceEnd,
}

/// Messages the server sends to the client, tagged with their event name.
///
/// ## Serialization:
/// Uses serde's adjacent tagging so each variant serializes as
/// `{"type": "...", "data": {...}}`, matching the envelope the client
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Providers are connected and the session is ready for audio.
    Initialized {},

    /// The user started speaking.
    SpeechStart {
        /// Milliseconds since the Unix epoch
        timestamp: i64,
    },

    /// The user stopped speaking; carries the full utterance transcript.
    SpeechEnd {
        /// Milliseconds since the Unix epoch
        timestamp: i64,
        /// Space-joined transcript of all final chunks in the utterance
        transcript: String,
        /// Which provider signal ended the utterance
        reason: UtteranceReason,
        /// Provider timestamp of the last word, when available (seconds)
        #[serde(skip_serializing_if = "Option::is_none")]
        last_word_end: Option<f64>,
    },

    /// Language-model generation started for the completed utterance.
    LlmStart {},

    /// One incremental generation token, in arrival order.
    LlmToken { token: String },

    /// Generation finished; carries the concatenation of all tokens.
    LlmComplete {
        #[serde(rename = "fullText")]
        full_text: String,
    },

    /// Generation failed (never emitted for cancelled generations).
    LlmError { error: String },

    /// One synthesized audio chunk, tagged with its synthesis context.
    TtsAudio {
        /// Base64-encoded audio payload
        audio: String,
        /// Context identifier correlating chunks of one spoken turn
        context_id: String,
        /// Whether this is the last chunk of the context
        done: bool,
        /// Container of the payload ("raw" or "wav"), when known
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },

    /// The synthesis provider finished the given context.
    TtsComplete { context_id: String },

    /// Synthesis failed; relayed verbatim from the provider.
    TtsError {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_id: Option<String>,
    },

    /// Session-level failure (missing credentials, provider setup failure).
    Error { code: String, message: String },
}
