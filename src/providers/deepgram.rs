//! # Deepgram Live Transcription Client
//!
//! Maintains one live-transcription WebSocket per session. Raw PCM frames
//! from the client are forwarded as binary frames; transcript results,
//! utterance-end markers and metadata come back as JSON text frames and are
//! forwarded to the session actor as [`TranscriptionUpdate`] messages.
//!
//! ## Keep-alive:
//! Deepgram drops idle connections, so the session actor sends
//! [`TranscriptionCommand::KeepAlive`] on a fixed interval for the whole
//! session lifetime, independent of whether the user is speaking.

use crate::config::DeepgramConfig;
use crate::providers::{TranscriptionStreamEvent, TranscriptionUpdate};
use actix::Recipient;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const LIVE_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";

/// Commands the session actor can issue against the transcription stream.
#[derive(Debug)]
pub enum TranscriptionCommand {
    /// Forward one raw PCM audio frame.
    Audio(Vec<u8>),
    /// Idle keep-alive ping.
    KeepAlive,
    /// Flush and close the stream.
    Close,
}

/// Handle to a connected transcription stream.
///
/// Commands go through an unbounded channel consumed by the writer task, so
/// issuing a command never suspends the session's event handling.
pub struct TranscriptionLink {
    commands: mpsc::UnboundedSender<TranscriptionCommand>,
}

impl TranscriptionLink {
    /// Issue a command; returns false when the stream is already gone.
    pub fn send(&self, command: TranscriptionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Link whose command channel is read by the caller instead of a writer
/// task, so session-level tests can observe the issued commands.
#[cfg(test)]
pub(crate) fn detached_link() -> (
    TranscriptionLink,
    mpsc::UnboundedReceiver<TranscriptionCommand>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TranscriptionLink { commands: tx }, rx)
}

/// Open the live-transcription WebSocket for one session.
///
/// Spawns a writer task (owning the sink half) and a reader task that
/// parses provider messages and delivers them to `recipient`. The reader
/// sends [`TranscriptionStreamEvent::Closed`] when the provider closes.
pub async fn connect(
    config: &DeepgramConfig,
    recipient: Recipient<TranscriptionUpdate>,
) -> Result<TranscriptionLink> {
    let url = format!(
        "{}?model={}&encoding=linear16&sample_rate={}&channels={}&interim_results=true&endpointing={}&utterance_end_ms={}",
        LIVE_ENDPOINT,
        config.model,
        config.sample_rate,
        config.channels,
        config.endpointing_ms,
        config.utterance_end_ms,
    );

    let mut request = url
        .into_client_request()
        .context("Invalid transcription endpoint URL")?;
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Token {}", config.api_key))
            .context("Transcription API key is not a valid header value")?,
    );

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("Failed to connect to transcription provider")?;
    debug!("Transcription provider connected");

    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Writer: audio frames, keep-alives, and the final CloseStream
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let result = match command {
                TranscriptionCommand::Audio(frame) => sink.send(WsMessage::Binary(frame)).await,
                TranscriptionCommand::KeepAlive => {
                    sink.send(WsMessage::Text(r#"{"type":"KeepAlive"}"#.to_string()))
                        .await
                }
                TranscriptionCommand::Close => {
                    let _ = sink
                        .send(WsMessage::Text(r#"{"type":"CloseStream"}"#.to_string()))
                        .await;
                    break;
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "Transcription send failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: provider messages -> session actor
    tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    if let Some(event) = parse_live_message(&text) {
                        recipient.do_send(TranscriptionUpdate(event));
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    recipient.do_send(TranscriptionUpdate(TranscriptionStreamEvent::Error(
                        e.to_string(),
                    )));
                    break;
                }
            }
        }
        recipient.do_send(TranscriptionUpdate(TranscriptionStreamEvent::Closed));
    });

    Ok(TranscriptionLink { commands: tx })
}

#[derive(Debug, Deserialize)]
struct LiveResult {
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    speech_final: bool,
    channel: LiveChannel,
}

#[derive(Debug, Deserialize)]
struct LiveChannel {
    alternatives: Vec<LiveAlternative>,
}

#[derive(Debug, Deserialize)]
struct LiveAlternative {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct LiveUtteranceEnd {
    last_word_end: Option<f64>,
}

/// Parse one provider text frame. Parse failures are logged per message and
/// never terminate the stream.
fn parse_live_message(text: &str) -> Option<TranscriptionStreamEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Unparseable transcription message");
            return None;
        }
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("Results") => match serde_json::from_value::<LiveResult>(value) {
            Ok(result) => {
                let transcript = result
                    .channel
                    .alternatives
                    .first()
                    .map(|alt| alt.transcript.trim().to_string())
                    .unwrap_or_default();
                Some(TranscriptionStreamEvent::Transcript {
                    text: transcript,
                    is_final: result.is_final,
                    speech_final: result.speech_final,
                })
            }
            Err(e) => {
                warn!(error = %e, "Malformed transcription result");
                None
            }
        },
        Some("UtteranceEnd") => match serde_json::from_value::<LiveUtteranceEnd>(value) {
            Ok(end) => Some(TranscriptionStreamEvent::UtteranceEnd {
                last_word_end: end.last_word_end,
            }),
            Err(e) => {
                warn!(error = %e, "Malformed utterance-end message");
                None
            }
        },
        Some("Metadata") => {
            debug!("Transcription metadata: {}", value);
            None
        }
        Some("SpeechStarted") => None,
        other => {
            debug!(message_type = ?other, "Unhandled transcription message type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_results_message() {
        let text = r#"{
            "type": "Results",
            "is_final": true,
            "speech_final": false,
            "channel": {"alternatives": [{"transcript": " hello world ", "confidence": 0.98}]}
        }"#;
        assert_eq!(
            parse_live_message(text),
            Some(TranscriptionStreamEvent::Transcript {
                text: "hello world".to_string(),
                is_final: true,
                speech_final: false,
            })
        );
    }

    #[test]
    fn test_parse_results_without_flags_defaults_false() {
        let text = r#"{"type":"Results","channel":{"alternatives":[{"transcript":"hi"}]}}"#;
        assert_eq!(
            parse_live_message(text),
            Some(TranscriptionStreamEvent::Transcript {
                text: "hi".to_string(),
                is_final: false,
                speech_final: false,
            })
        );
    }

    #[test]
    fn test_parse_utterance_end() {
        let text = r#"{"type":"UtteranceEnd","channel":[0,1],"last_word_end":7.31}"#;
        assert_eq!(
            parse_live_message(text),
            Some(TranscriptionStreamEvent::UtteranceEnd {
                last_word_end: Some(7.31),
            })
        );
    }

    #[test]
    fn test_metadata_and_unknown_types_are_dropped() {
        assert_eq!(parse_live_message(r#"{"type":"Metadata","request_id":"r"}"#), None);
        assert_eq!(parse_live_message(r#"{"type":"SomethingNew"}"#), None);
    }

    #[test]
    fn test_invalid_json_is_dropped() {
        assert_eq!(parse_live_message("not json at all"), None);
    }
}
