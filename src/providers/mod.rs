//! # Provider Integrations
//!
//! Clients for the three external collaborators:
//! - **deepgram**: streaming transcription over a live WebSocket
//! - **openrouter**: streaming chat-completion generation over SSE
//! - **cartesia**: streaming speech synthesis over a WebSocket
//!
//! Each client runs its network I/O on tokio tasks and reports back to the
//! owning session actor through `actix` messages, so every provider event
//! is serialized through the session's mailbox. The enums in this module
//! are the session-facing shape of those events; the machine consumes them
//! without knowing anything about the wire protocols.

pub mod cartesia;
pub mod deepgram;
pub mod openrouter;

use actix::Message;

/// One event from the transcription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionStreamEvent {
    /// A partial or final transcript for the current audio.
    Transcript {
        text: String,
        is_final: bool,
        speech_final: bool,
    },
    /// The provider's end-of-utterance marker.
    UtteranceEnd { last_word_end: Option<f64> },
    /// Transport or provider-side error; the transcription pipeline is
    /// inert afterwards until the client reconnects.
    Error(String),
    /// The provider closed the stream.
    Closed,
}

/// Actor envelope for transcription events.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct TranscriptionUpdate(pub TranscriptionStreamEvent);

/// One event from a generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStreamEvent {
    /// One incremental token, in arrival order.
    Token(String),
    /// End of stream; carries the concatenation of all tokens.
    Complete(String),
    /// Non-abort failure (transport error, non-success status). Fires at
    /// most once per request. Aborted requests emit nothing.
    Error(String),
}

/// Actor envelope for generation events, fenced by generation id so events
/// from a cancelled request can be discarded.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct GenerationUpdate {
    pub generation_id: u64,
    pub event: GenerationStreamEvent,
}

/// One event from the synthesis stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisStreamEvent {
    /// One audio chunk, tagged with the synthesis context it belongs to.
    Chunk {
        context_id: String,
        /// Base64-encoded audio payload
        audio: String,
        done: bool,
        /// Payload container ("raw" or "wav")
        format: Option<String>,
    },
    /// The provider finished the given context.
    Done { context_id: String },
    /// Provider-side error, relayed verbatim.
    Error {
        error: String,
        context_id: Option<String>,
    },
    /// The provider closed the stream.
    Closed,
}

/// Actor envelope for synthesis events.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct SynthesisUpdate(pub SynthesisStreamEvent);
