//! # Cartesia Streaming Synthesis Client
//!
//! Drives the text-to-speech WebSocket for one session. Sentence segments
//! are written as synthesis requests sharing a context id, so the voice
//! carries prosody across segments of the same reply; audio chunks come
//! back base64-encoded and are forwarded to the session actor.
//!
//! ## Context lifecycle:
//! - The first segment of a reply opens a fresh context; later segments
//!   reuse the id with `continue: true`.
//! - An empty-transcript request with `continue: false` closes the context
//!   and elicits the provider's `done` message.
//! - A cancel request stops synthesis for a context immediately.
//!
//! ## Output conversion:
//! The provider streams raw `pcm_f32le`. When `convert_to_wav` is set each
//! chunk is wrapped in a standalone WAV container before relay, for clients
//! that cannot play headerless PCM.

use crate::audio::pcm_f32le_to_wav;
use crate::config::CartesiaConfig;
use crate::providers::{SynthesisStreamEvent, SynthesisUpdate};
use actix::Recipient;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

const TTS_ENDPOINT: &str = "wss://api.cartesia.ai/tts/websocket";

/// Commands the session actor can issue against the synthesis stream.
#[derive(Debug)]
pub enum SynthesisCommand {
    /// Synthesize one sentence segment within a context.
    Speak {
        text: String,
        context_id: String,
        /// False opens a new context, true extends the current one.
        continuation: bool,
    },
    /// Close a context so the provider flushes and reports `done`.
    Finish { context_id: String },
    /// Stop synthesis for a context immediately.
    Cancel { context_id: String },
    /// Close the connection.
    Close,
}

/// Handle to a connected synthesis stream.
pub struct SynthesisLink {
    commands: mpsc::UnboundedSender<SynthesisCommand>,
}

impl SynthesisLink {
    /// Issue a command; returns false when the stream is already gone.
    pub fn send(&self, command: SynthesisCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Link whose command channel is read by the caller instead of a writer
/// task, so session-level tests can observe the issued commands.
#[cfg(test)]
pub(crate) fn detached_link() -> (SynthesisLink, mpsc::UnboundedReceiver<SynthesisCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SynthesisLink { commands: tx }, rx)
}

/// Open the synthesis WebSocket for one session.
pub async fn connect(
    config: &CartesiaConfig,
    recipient: Recipient<SynthesisUpdate>,
) -> Result<SynthesisLink> {
    let url = format!(
        "{}?api_key={}&cartesia_version={}",
        TTS_ENDPOINT, config.api_key, config.version
    );

    let (stream, _response) = tokio_tungstenite::connect_async(&url)
        .await
        .context("Failed to connect to synthesis provider")?;
    debug!("Synthesis provider connected");

    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let request_config = config.clone();
    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let payload = match command {
                SynthesisCommand::Speak {
                    text,
                    context_id,
                    continuation,
                } => {
                    if !continuation {
                        debug!(context_id = %context_id, "Opening synthesis context");
                    }
                    // Every streamed segment may be followed by more input,
                    // so the wire flag stays true until the finish request
                    synthesis_request(&request_config, &text, &context_id, true)
                }
                SynthesisCommand::Finish { context_id } => {
                    synthesis_request(&request_config, "", &context_id, false)
                }
                SynthesisCommand::Cancel { context_id } => json!({
                    "context_id": context_id,
                    "cancel": true,
                })
                .to_string(),
                SynthesisCommand::Close => break,
            };
            if let Err(e) = sink.send(WsMessage::Text(payload)).await {
                warn!(error = %e, "Synthesis send failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let convert_to_wav = config.convert_to_wav;
    let sample_rate = config.sample_rate;
    tokio::spawn(async move {
        while let Some(message) = source.next().await {
            match message {
                Ok(WsMessage::Text(text)) => {
                    if let Some(event) = parse_synthesis_message(&text, convert_to_wav, sample_rate)
                    {
                        recipient.do_send(SynthesisUpdate(event));
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    recipient.do_send(SynthesisUpdate(SynthesisStreamEvent::Error {
                        error: e.to_string(),
                        context_id: None,
                    }));
                    break;
                }
            }
        }
        recipient.do_send(SynthesisUpdate(SynthesisStreamEvent::Closed));
    });

    Ok(SynthesisLink { commands: tx })
}

fn synthesis_request(
    config: &CartesiaConfig,
    transcript: &str,
    context_id: &str,
    continuation: bool,
) -> String {
    json!({
        "model_id": config.model_id,
        "transcript": transcript,
        "voice": {
            "mode": "id",
            "id": config.voice_id,
        },
        "language": config.language,
        "context_id": context_id,
        "output_format": {
            "container": "raw",
            "encoding": "pcm_f32le",
            "sample_rate": config.sample_rate,
        },
        "add_timestamps": true,
        "continue": continuation,
    })
    .to_string()
}

/// Parse one provider text frame into a session-facing event. Unknown and
/// malformed messages are logged and dropped.
fn parse_synthesis_message(
    text: &str,
    convert_to_wav: bool,
    sample_rate: u32,
) -> Option<SynthesisStreamEvent> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Unparseable synthesis message");
            return None;
        }
    };
    let context_id = value
        .get("context_id")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    match value.get("type").and_then(|t| t.as_str()) {
        Some("chunk") => {
            let audio = value.get("data").and_then(|d| d.as_str()).unwrap_or("");
            if audio.is_empty() {
                return None;
            }
            let done = value.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
            let (audio, format) = if convert_to_wav {
                convert_chunk(audio, sample_rate)
            } else {
                (audio.to_string(), "raw")
            };
            Some(SynthesisStreamEvent::Chunk {
                context_id: context_id.unwrap_or_default(),
                audio,
                done,
                format: Some(format.to_string()),
            })
        }
        Some("timestamps") => {
            debug!("Synthesis word timestamps: {}", value);
            None
        }
        Some("done") => Some(SynthesisStreamEvent::Done {
            context_id: context_id.unwrap_or_default(),
        }),
        Some("error") => Some(SynthesisStreamEvent::Error {
            error: value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown synthesis error")
                .to_string(),
            context_id,
        }),
        other => {
            debug!(message_type = ?other, "Unhandled synthesis message type");
            None
        }
    }
}

/// Re-encode one base64 PCM chunk as a standalone WAV file. Falls back to
/// the raw payload when decoding or conversion fails.
fn convert_chunk(audio_b64: &str, sample_rate: u32) -> (String, &'static str) {
    let pcm = match BASE64.decode(audio_b64) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Audio chunk is not valid base64, relaying as-is");
            return (audio_b64.to_string(), "raw");
        }
    };
    match pcm_f32le_to_wav(&pcm, sample_rate) {
        Ok(wav) => (BASE64.encode(wav), "wav"),
        Err(e) => {
            warn!(error = %e, "WAV conversion failed, relaying raw PCM");
            (audio_b64.to_string(), "raw")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartesiaConfig;

    fn test_config() -> CartesiaConfig {
        CartesiaConfig {
            api_key: "key".to_string(),
            version: "2024-06-10".to_string(),
            model_id: "sonic-2".to_string(),
            voice_id: "voice-1".to_string(),
            language: "en".to_string(),
            sample_rate: 44100,
            convert_to_wav: false,
        }
    }

    #[test]
    fn test_speak_request_shape() {
        let payload = synthesis_request(&test_config(), "Hi there.", "ctx-1", true);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["model_id"], "sonic-2");
        assert_eq!(value["transcript"], "Hi there.");
        assert_eq!(value["voice"]["mode"], "id");
        assert_eq!(value["voice"]["id"], "voice-1");
        assert_eq!(value["context_id"], "ctx-1");
        assert_eq!(value["output_format"]["container"], "raw");
        assert_eq!(value["output_format"]["encoding"], "pcm_f32le");
        assert_eq!(value["output_format"]["sample_rate"], 44100);
        assert_eq!(value["continue"], true);
        assert_eq!(value["add_timestamps"], true);
    }

    #[test]
    fn test_finish_request_closes_context() {
        let finish = synthesis_request(&test_config(), "", "ctx-1", false);
        let value: serde_json::Value = serde_json::from_str(&finish).unwrap();
        assert_eq!(value["transcript"], "");
        assert_eq!(value["continue"], false);
    }

    #[test]
    fn test_parse_chunk_message() {
        let text = r#"{"type":"chunk","context_id":"ctx-1","data":"QUJD","done":false}"#;
        assert_eq!(
            parse_synthesis_message(text, false, 44100),
            Some(SynthesisStreamEvent::Chunk {
                context_id: "ctx-1".to_string(),
                audio: "QUJD".to_string(),
                done: false,
                format: Some("raw".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_chunk_without_data_is_dropped() {
        let text = r#"{"type":"chunk","context_id":"ctx-1","done":false}"#;
        assert_eq!(parse_synthesis_message(text, false, 44100), None);
    }

    #[test]
    fn test_parse_done_and_error_messages() {
        assert_eq!(
            parse_synthesis_message(r#"{"type":"done","context_id":"ctx-1"}"#, false, 44100),
            Some(SynthesisStreamEvent::Done {
                context_id: "ctx-1".to_string(),
            })
        );
        assert_eq!(
            parse_synthesis_message(
                r#"{"type":"error","error":"voice not found","context_id":"ctx-1"}"#,
                false,
                44100,
            ),
            Some(SynthesisStreamEvent::Error {
                error: "voice not found".to_string(),
                context_id: Some("ctx-1".to_string()),
            })
        );
    }

    #[test]
    fn test_chunk_wav_conversion() {
        // Four little-endian f32 samples
        let pcm: Vec<u8> = [0.0f32, 0.5, -0.5, 1.0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let text = format!(
            r#"{{"type":"chunk","context_id":"ctx-1","data":"{}","done":true}}"#,
            BASE64.encode(&pcm)
        );

        match parse_synthesis_message(&text, true, 44100) {
            Some(SynthesisStreamEvent::Chunk {
                audio,
                done,
                format,
                ..
            }) => {
                assert!(done);
                assert_eq!(format.as_deref(), Some("wav"));
                let wav = BASE64.decode(audio).unwrap();
                assert_eq!(&wav[..4], b"RIFF");
                assert_eq!(&wav[8..12], b"WAVE");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_timestamps_message_is_dropped() {
        let text = r#"{"type":"timestamps","context_id":"ctx-1","word_timestamps":{}}"#;
        assert_eq!(parse_synthesis_message(text, false, 44100), None);
    }
}
