//! # Session State Machine
//!
//! The decision core of a voice session. All provider events for a session
//! are serialized through the session actor's mailbox and handed to this
//! machine; the machine mutates only its own session state and returns
//! [`Command`]s describing the side effects to perform. No network I/O
//! happens here, which is what makes interruption ordering and stale-audio
//! suppression testable without live provider connections.
//!
//! ## States:
//! - **Idle**: nothing in flight
//! - **Listening**: the user is speaking
//! - **Generating**: a language-model request is streaming
//! - **Speaking**: generation finished, synthesis still playing out
//!
//! ## Interruption:
//! An utterance-start while generating or speaking cancels the generation,
//! repairs the pending assistant message with any partial text, cancels
//! the active synthesis context by its exact identifier, and nulls the
//! session's context id immediately. The context id is therefore null
//! whenever no generation or synthesis is in flight, and the relay gate
//! in [`SessionMachine::on_synthesis`] is the single place that compares a
//! chunk's context id against the session's current one.

use crate::protocol::{ServerEvent, UtteranceReason};
use crate::providers::{GenerationStreamEvent, SynthesisStreamEvent, TranscriptionStreamEvent};
use crate::session::detector::{UtteranceDetector, UtteranceSignal};
use crate::session::segmenter::SentenceSegmenter;
use crate::session::ConversationMessage;
use uuid::Uuid;

/// Named session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Generating,
    Speaking,
}

/// Side effects requested by a state transition, executed by the session
/// actor in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Send an event to the client connection.
    Relay(ServerEvent),
    /// Abort the in-flight generation request.
    CancelGeneration,
    /// Open a new generation request with this message history.
    StartGeneration { messages: Vec<ConversationMessage> },
    /// Dispatch one text segment to the synthesis provider.
    Synthesize {
        text: String,
        context_id: String,
        continuation: bool,
    },
    /// Close out a synthesis context after its final segment.
    FinishSynthesis { context_id: String },
    /// Cancel all pending synthesis for the given context.
    CancelSynthesis { context_id: String },
}

/// Per-session orchestration state.
pub struct SessionMachine {
    state: SessionState,
    detector: UtteranceDetector,
    segmenter: SentenceSegmenter,
    history: Vec<ConversationMessage>,
    /// Active synthesis context; null whenever nothing is in flight
    context_id: Option<String>,
    generation_active: bool,
    /// Tokens relayed so far for the in-flight generation
    partial_response: String,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            detector: UtteranceDetector::new(),
            segmenter: SentenceSegmenter::new(),
            history: Vec::new(),
            context_id: None,
            generation_active: false,
            partial_response: String::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn context_id(&self) -> Option<&str> {
        self.context_id.as_deref()
    }

    pub fn history(&self) -> &[ConversationMessage] {
        &self.history
    }

    /// Handle one transcription event.
    pub fn on_transcription(&mut self, event: TranscriptionStreamEvent) -> Vec<Command> {
        let signals = match event {
            TranscriptionStreamEvent::Transcript {
                text,
                is_final,
                speech_final,
            } => self.detector.on_transcript(&text, is_final, speech_final),
            TranscriptionStreamEvent::UtteranceEnd { last_word_end } => {
                self.detector.on_utterance_end(last_word_end).into_iter().collect()
            }
            // Errors and closes carry no transition; the actor logs them
            TranscriptionStreamEvent::Error(_) | TranscriptionStreamEvent::Closed => Vec::new(),
        };

        let mut commands = Vec::new();
        for signal in signals {
            match signal {
                UtteranceSignal::Started => {
                    commands.push(Command::Relay(ServerEvent::SpeechStart {
                        timestamp: chrono::Utc::now().timestamp_millis(),
                    }));
                    commands.extend(self.interrupt());
                    self.state = SessionState::Listening;
                }
                UtteranceSignal::Completed {
                    transcript,
                    reason,
                    last_word_end,
                } => {
                    commands.extend(self.complete_utterance(transcript, reason, last_word_end));
                }
            }
        }
        commands
    }

    /// Handle one generation event. The actor has already discarded events
    /// from cancelled generations via their generation id.
    pub fn on_generation(&mut self, event: GenerationStreamEvent) -> Vec<Command> {
        match event {
            GenerationStreamEvent::Token(token) => {
                self.partial_response.push_str(&token);
                let mut commands = vec![Command::Relay(ServerEvent::LlmToken {
                    token: token.clone(),
                })];
                if let Some(segment) = self.segmenter.push_token(&token) {
                    commands.push(self.dispatch_segment(segment));
                }
                commands
            }
            GenerationStreamEvent::Complete(full_text) => {
                self.generation_active = false;
                self.partial_response.clear();
                self.history.push(ConversationMessage::assistant(full_text.clone()));

                let mut commands = vec![Command::Relay(ServerEvent::LlmComplete { full_text })];
                if let Some(segment) = self.segmenter.flush() {
                    commands.push(self.dispatch_segment(segment));
                }
                match &self.context_id {
                    Some(context_id) => {
                        commands.push(Command::FinishSynthesis {
                            context_id: context_id.clone(),
                        });
                        self.state = SessionState::Speaking;
                    }
                    None => {
                        self.state = SessionState::Idle;
                    }
                }
                commands
            }
            GenerationStreamEvent::Error(error) => {
                self.generation_active = false;
                self.partial_response.clear();
                self.state = if self.context_id.is_some() {
                    SessionState::Speaking
                } else {
                    SessionState::Idle
                };
                vec![Command::Relay(ServerEvent::LlmError { error })]
            }
        }
    }

    /// Handle one synthesis event. This is the relay boundary: audio for a
    /// context that is no longer current is dropped here and nowhere else.
    pub fn on_synthesis(&mut self, event: SynthesisStreamEvent) -> Vec<Command> {
        match event {
            SynthesisStreamEvent::Chunk {
                context_id,
                audio,
                done,
                format,
            } => {
                if self.context_id.as_deref() != Some(context_id.as_str()) {
                    // Stale audio from an interrupted turn
                    return Vec::new();
                }
                vec![Command::Relay(ServerEvent::TtsAudio {
                    audio,
                    context_id,
                    done,
                    format,
                })]
            }
            SynthesisStreamEvent::Done { context_id } => {
                if self.context_id.as_deref() != Some(context_id.as_str()) {
                    return Vec::new();
                }
                self.context_id = None;
                if self.state == SessionState::Speaking {
                    self.state = SessionState::Idle;
                }
                vec![Command::Relay(ServerEvent::TtsComplete { context_id })]
            }
            SynthesisStreamEvent::Error { error, context_id } => {
                // Relayed verbatim, no retry, and independent of the
                // generation pipeline
                vec![Command::Relay(ServerEvent::TtsError { error, context_id })]
            }
            SynthesisStreamEvent::Closed => Vec::new(),
        }
    }

    /// Cancel everything in flight for the current turn.
    ///
    /// Issued synchronously inside the utterance-start transition, so the
    /// cancellation of turn N is fully issued before any effect of turn
    /// N+1 can be dispatched.
    fn interrupt(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();

        if self.generation_active {
            commands.push(Command::CancelGeneration);
            self.generation_active = false;
            // Pending-assistant repair: keep the partial response so the
            // history's user/assistant alternation survives the cancel
            if !self.partial_response.is_empty() {
                self.history.push(ConversationMessage::assistant(std::mem::take(
                    &mut self.partial_response,
                )));
            }
        }
        self.partial_response.clear();

        if let Some(context_id) = self.context_id.take() {
            commands.push(Command::CancelSynthesis { context_id });
        }
        self.segmenter.reset();

        commands
    }

    fn complete_utterance(
        &mut self,
        transcript: String,
        reason: UtteranceReason,
        last_word_end: Option<f64>,
    ) -> Vec<Command> {
        let mut commands = vec![Command::Relay(ServerEvent::SpeechEnd {
            timestamp: chrono::Utc::now().timestamp_millis(),
            transcript: transcript.clone(),
            reason,
            last_word_end,
        })];

        if transcript.trim().is_empty() {
            self.state = SessionState::Idle;
            return commands;
        }

        self.history.push(ConversationMessage::user(transcript));
        self.generation_active = true;
        self.partial_response.clear();
        self.state = SessionState::Generating;

        commands.push(Command::Relay(ServerEvent::LlmStart {}));
        commands.push(Command::StartGeneration {
            messages: self.history.clone(),
        });
        commands
    }

    /// Dispatch one segment, creating the turn's synthesis context on the
    /// first segment and continuing it on later ones.
    fn dispatch_segment(&mut self, text: String) -> Command {
        match &self.context_id {
            Some(context_id) => Command::Synthesize {
                text,
                context_id: context_id.clone(),
                continuation: true,
            },
            None => {
                let context_id = format!("ctx-{}", Uuid::new_v4());
                self.context_id = Some(context_id.clone());
                Command::Synthesize {
                    text,
                    context_id,
                    continuation: false,
                }
            }
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn transcript(text: &str, is_final: bool, speech_final: bool) -> TranscriptionStreamEvent {
        TranscriptionStreamEvent::Transcript {
            text: text.to_string(),
            is_final,
            speech_final,
        }
    }

    /// Drive a machine through one completed utterance so a generation is
    /// in flight.
    fn machine_mid_generation() -> SessionMachine {
        let mut machine = SessionMachine::new();
        let commands = machine.on_transcription(transcript("tell me a story", true, true));
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::StartGeneration { .. })));
        assert_eq!(machine.state(), SessionState::Generating);
        machine
    }

    fn synthesize_commands(commands: &[Command]) -> Vec<(&str, &str, bool)> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Synthesize {
                    text,
                    context_id,
                    continuation,
                } => Some((text.as_str(), context_id.as_str(), *continuation)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_completed_utterance_starts_generation_with_history() {
        let mut machine = SessionMachine::new();
        let commands = machine.on_transcription(transcript("hello", true, true));

        let messages = commands
            .iter()
            .find_map(|c| match c {
                Command::StartGeneration { messages } => Some(messages.clone()),
                _ => None,
            })
            .expect("generation should start");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
    }

    #[test]
    fn test_empty_transcript_does_not_start_generation() {
        let mut machine = SessionMachine::new();
        // UtteranceEnd while speaking with nothing accumulated
        machine.on_transcription(transcript("mm", false, false));
        let commands =
            machine.on_transcription(TranscriptionStreamEvent::UtteranceEnd { last_word_end: None });

        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::Relay(ServerEvent::SpeechEnd { .. }))));
        assert!(!commands
            .iter()
            .any(|c| matches!(c, Command::StartGeneration { .. })));
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_token_stream_segments_into_three_dispatches() {
        let mut machine = machine_mid_generation();

        let mut all = Vec::new();
        for token in ["Hi there", ". How are", " you? Good", "."] {
            all.extend(machine.on_generation(GenerationStreamEvent::Token(token.to_string())));
        }

        let dispatched = synthesize_commands(&all);
        assert_eq!(dispatched.len(), 3);
        assert_eq!(dispatched[0].0, "Hi there.");
        assert_eq!(dispatched[1].0, " How are you?");
        assert_eq!(dispatched[2].0, " Good.");

        // First segment opens the context, the rest continue it
        assert!(!dispatched[0].2);
        assert!(dispatched[1].2);
        assert!(dispatched[2].2);
        assert_eq!(dispatched[0].1, dispatched[1].1);
        assert_eq!(dispatched[1].1, dispatched[2].1);
    }

    #[test]
    fn test_completion_flushes_remainder_and_finishes_context() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("Sure. Than".to_string()));
        let commands =
            machine.on_generation(GenerationStreamEvent::Complete("Sure. Thanks".to_string()));

        let dispatched = synthesize_commands(&commands);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0, "ks");
        assert!(dispatched[0].2, "final remainder continues the open context");

        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::FinishSynthesis { .. })));
        assert_eq!(machine.state(), SessionState::Speaking);

        // Assistant reply appended to history
        let last = machine.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Sure. Thanks");
    }

    #[test]
    fn test_completion_without_terminator_dispatches_fresh_context() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("Thanks".to_string()));
        let commands =
            machine.on_generation(GenerationStreamEvent::Complete("Thanks".to_string()));

        let dispatched = synthesize_commands(&commands);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].0, "Thanks");
        assert!(!dispatched[0].2, "no prior segment, so this opens the context");
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::FinishSynthesis { .. })));
    }

    #[test]
    fn test_interruption_cancels_generation_and_synthesis_in_order() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("One moment. I".to_string()));
        let old_context = machine.context_id().unwrap().to_string();

        let commands = machine.on_transcription(transcript("wait", false, false));

        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, Command::CancelGeneration))
                .count(),
            1
        );
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::CancelSynthesis { context_id } if *context_id == old_context
        )));
        assert_eq!(machine.context_id(), None, "context nulled immediately");
        assert_eq!(machine.state(), SessionState::Listening);
    }

    #[test]
    fn test_interruption_repairs_pending_assistant_message() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("Well, ".to_string()));
        machine.on_generation(GenerationStreamEvent::Token("let me".to_string()));

        machine.on_transcription(transcript("actually", false, false));

        let last = machine.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Well, let me");
    }

    #[test]
    fn test_interruption_before_tokens_leaves_history_alone() {
        let mut machine = machine_mid_generation();
        let history_len = machine.history().len();

        machine.on_transcription(transcript("actually", false, false));
        assert_eq!(machine.history().len(), history_len);
    }

    #[test]
    fn test_stale_audio_is_suppressed_after_interruption() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("Okay. ".to_string()));
        let old_context = machine.context_id().unwrap().to_string();

        machine.on_transcription(transcript("stop", false, false));

        let commands = machine.on_synthesis(SynthesisStreamEvent::Chunk {
            context_id: old_context.clone(),
            audio: "AAAA".to_string(),
            done: false,
            format: None,
        });
        assert!(commands.is_empty(), "stale chunk must not reach the client");

        // Done for the stale context is ignored too
        assert!(machine
            .on_synthesis(SynthesisStreamEvent::Done {
                context_id: old_context
            })
            .is_empty());
    }

    #[test]
    fn test_current_audio_is_relayed_and_done_completes_turn() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("Hello.".to_string()));
        machine.on_generation(GenerationStreamEvent::Complete("Hello.".to_string()));
        let context = machine.context_id().unwrap().to_string();

        let chunk = machine.on_synthesis(SynthesisStreamEvent::Chunk {
            context_id: context.clone(),
            audio: "AAAA".to_string(),
            done: false,
            format: Some("raw".to_string()),
        });
        assert!(matches!(
            &chunk[0],
            Command::Relay(ServerEvent::TtsAudio { context_id, .. }) if *context_id == context
        ));

        let done = machine.on_synthesis(SynthesisStreamEvent::Done {
            context_id: context.clone(),
        });
        assert!(matches!(
            &done[0],
            Command::Relay(ServerEvent::TtsComplete { context_id }) if *context_id == context
        ));
        assert_eq!(machine.context_id(), None);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn test_synthesis_error_is_relayed_verbatim() {
        let mut machine = SessionMachine::new();
        let commands = machine.on_synthesis(SynthesisStreamEvent::Error {
            error: "voice not found".to_string(),
            context_id: Some("ctx-gone".to_string()),
        });
        assert!(matches!(
            &commands[0],
            Command::Relay(ServerEvent::TtsError { error, .. }) if error == "voice not found"
        ));
    }

    #[test]
    fn test_generation_error_relayed_and_pipeline_goes_idle() {
        let mut machine = machine_mid_generation();
        let commands =
            machine.on_generation(GenerationStreamEvent::Error("502 from provider".to_string()));

        assert!(matches!(
            &commands[0],
            Command::Relay(ServerEvent::LlmError { error }) if error == "502 from provider"
        ));
        assert_eq!(machine.state(), SessionState::Idle);

        // The next utterance can start a fresh generation
        let retry = machine.on_transcription(transcript("try again", true, true));
        assert!(retry
            .iter()
            .any(|c| matches!(c, Command::StartGeneration { .. })));
    }

    #[test]
    fn test_second_turn_history_alternates() {
        let mut machine = machine_mid_generation();
        machine.on_generation(GenerationStreamEvent::Token("Hi.".to_string()));
        machine.on_generation(GenerationStreamEvent::Complete("Hi.".to_string()));

        let commands = machine.on_transcription(transcript("next question", true, true));
        let messages = commands
            .iter()
            .find_map(|c| match c {
                Command::StartGeneration { messages } => Some(messages.clone()),
                _ => None,
            })
            .unwrap();

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }
}
