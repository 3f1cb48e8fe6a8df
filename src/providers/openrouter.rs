//! # OpenRouter Streaming Generation Client
//!
//! Streams chat completions over SSE and owns the lifecycle of the one
//! in-flight request a session may have.
//!
//! ## Cancellation:
//! [`GenerationController::cancel`] aborts the streaming task outright.
//! Aborted requests emit no further events; any updates already sitting in
//! the session mailbox carry a stale generation id and are discarded by the
//! [`GenerationController::is_current`] fence. Abort-caused errors are
//! never surfaced to the client.

use crate::config::OpenRouterConfig;
use crate::providers::{GenerationStreamEvent, GenerationUpdate};
use crate::session::ConversationMessage;
use actix::Recipient;
use anyhow::Result;
use futures_util::StreamExt;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const CHAT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Instructions prepended to every request; the conversation history never
/// stores this message.
pub const SYSTEM_PROMPT: &str = "You are a professional job interviewer conducting a spoken \
interview. Your responses are converted to speech, so keep them short, natural and \
conversational: one or two sentences, no lists, no markdown, no stage directions. Ask one \
question at a time, follow up on what the candidate actually said, and move on once a topic \
is exhausted.";

struct ActiveGeneration {
    id: u64,
    task: JoinHandle<()>,
}

/// Owns the session's at-most-one in-flight generation request.
pub struct GenerationController {
    next_id: u64,
    active: Option<ActiveGeneration>,
}

impl Default for GenerationController {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationController {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            active: None,
        }
    }

    /// Spawn a streaming request for the given history and return its id.
    ///
    /// The caller must have cancelled any previous request first; starting
    /// while one is active orphans the old handle.
    pub fn start(
        &mut self,
        config: OpenRouterConfig,
        history: &[ConversationMessage],
        recipient: Recipient<GenerationUpdate>,
    ) -> u64 {
        debug_assert!(self.active.is_none(), "generation started while one is active");

        let id = self.next_id;
        self.next_id += 1;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ConversationMessage::system(SYSTEM_PROMPT));
        messages.extend_from_slice(history);

        let task = tokio::spawn(run_stream(config, messages, id, recipient));
        self.active = Some(ActiveGeneration { id, task });
        id
    }

    /// Abort the in-flight request, if any.
    pub fn cancel(&mut self) {
        if let Some(generation) = self.active.take() {
            debug!(generation_id = generation.id, "Aborting generation request");
            generation.task.abort();
        }
    }

    /// Whether an update with this id belongs to the current request.
    pub fn is_current(&self, id: u64) -> bool {
        self.active.as_ref().map_or(false, |g| g.id == id)
    }

    /// Mark the current request finished once its terminal event arrives.
    pub fn finish(&mut self, id: u64) {
        if self.is_current(id) {
            self.active = None;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

async fn run_stream(
    config: OpenRouterConfig,
    messages: Vec<ConversationMessage>,
    generation_id: u64,
    recipient: Recipient<GenerationUpdate>,
) {
    if let Err(error) = stream_completion(&config, &messages, generation_id, &recipient).await {
        warn!(generation_id, error = %error, "Generation stream failed");
        recipient.do_send(GenerationUpdate {
            generation_id,
            event: GenerationStreamEvent::Error(error.to_string()),
        });
    }
}

/// Run one streaming chat-completion request, emitting a token update per
/// delta and exactly one completion update at end of stream.
async fn stream_completion(
    config: &OpenRouterConfig,
    messages: &[ConversationMessage],
    generation_id: u64,
    recipient: &Recipient<GenerationUpdate>,
) -> Result<()> {
    let client = reqwest::Client::new();
    let response = client
        .post(CHAT_COMPLETIONS_URL)
        .bearer_auth(&config.api_key)
        .json(&json!({
            "model": config.model,
            "messages": messages,
            "stream": true,
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Generation request failed with status {}: {}", status, body);
    }

    let mut stream = response.bytes_stream();
    let mut line_buffer = String::new();
    let mut full_text = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        line_buffer.push_str(&String::from_utf8_lossy(&chunk));

        // SSE frames may split across chunks; only complete lines are parsed
        while let Some(newline) = line_buffer.find('\n') {
            let line = line_buffer[..newline].trim().to_string();
            line_buffer.drain(..=newline);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                recipient.do_send(GenerationUpdate {
                    generation_id,
                    event: GenerationStreamEvent::Complete(full_text),
                });
                return Ok(());
            }
            if let Some(token) = extract_token(data) {
                full_text.push_str(&token);
                recipient.do_send(GenerationUpdate {
                    generation_id,
                    event: GenerationStreamEvent::Token(token),
                });
            }
        }
    }

    // Stream ended without the [DONE] sentinel; still a completion
    recipient.do_send(GenerationUpdate {
        generation_id,
        event: GenerationStreamEvent::Complete(full_text),
    });
    Ok(())
}

/// Pull the delta content out of one SSE data payload. Malformed payloads
/// (OpenRouter occasionally interleaves comment keep-alives) are skipped.
fn extract_token(data: &str) -> Option<String> {
    let parsed: serde_json::Value = serde_json::from_str(data).ok()?;
    let content = parsed
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
