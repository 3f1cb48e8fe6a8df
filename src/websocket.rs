//! # Voice Session WebSocket
//!
//! One actor per client connection. The actor is the session orchestrator:
//! every transcription, generation and synthesis event lands in its mailbox
//! and is processed one at a time, so the session state machine never sees
//! concurrent mutation.
//!
//! ## Protocol:
//! 1. **Connection**: client connects to `/ws`
//! 2. **Initialization**: client sends `{"type": "initialize"}` once; the
//!    server connects the providers and answers with `initialized` (or an
//!    `error` event)
//! 3. **Audio Streaming**: client streams raw PCM audio as binary frames;
//!    frames that are too small or odd-sized are discarded as non-audio noise
//! 4. **Session Events**: server pushes the events defined in
//!    [`crate::protocol`]
//!
//! ## Lifecycle:
//! The actor registers the session on `initialize` and unregisters it in
//! `stopped`, cancelling the in-flight generation and closing both provider
//! links so their tasks wind down.

use crate::config::AppConfig;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::providers::cartesia::{self, SynthesisCommand, SynthesisLink};
use crate::providers::deepgram::{self, TranscriptionCommand, TranscriptionLink};
use crate::providers::openrouter::GenerationController;
use crate::providers::{
    GenerationStreamEvent, GenerationUpdate, SynthesisStreamEvent, SynthesisUpdate,
    TranscriptionStreamEvent, TranscriptionUpdate,
};
use crate::session::machine::{Command, SessionMachine};
use crate::session::registry::{SessionInfo, SessionRegistry};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of the provider connection attempts kicked off by `initialize`.
#[derive(Message)]
#[rtype(result = "()")]
struct ProvidersConnected {
    result: anyhow::Result<(TranscriptionLink, SynthesisLink)>,
}

/// Per-connection voice session actor.
pub struct VoiceWebSocket {
    connection_id: Uuid,
    config: AppConfig,
    registry: Arc<SessionRegistry>,
    /// Present once initialization succeeded
    machine: Option<SessionMachine>,
    transcription: Option<TranscriptionLink>,
    synthesis: Option<SynthesisLink>,
    generation: GenerationController,
    connected_at: Instant,
}

impl VoiceWebSocket {
    pub fn new(config: AppConfig, registry: Arc<SessionRegistry>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            config,
            registry,
            machine: None,
            transcription: None,
            synthesis: None,
            generation: GenerationController::new(),
            connected_at: Instant::now(),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(error = %e, "Failed to serialize server event"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: String) {
        self.send_event(
            ctx,
            &ServerEvent::Error {
                code: code.to_string(),
                message,
            },
        );
    }

    /// Handle the client's `initialize` event: run the admission checks,
    /// then connect both streaming providers off-actor.
    fn handle_initialize(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        // The registry entry exists from admission until disconnect, so the
        // lookup doubles as the duplicate-initialize guard
        if self.registry.get(&self.connection_id).is_some() {
            warn!(connection_id = %self.connection_id, "Duplicate initialize ignored");
            return;
        }

        if let Err(event) = self.admit() {
            self.send_event(ctx, &event);
            return;
        }

        info!(connection_id = %self.connection_id, "Connecting providers");

        let providers = self.config.providers.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            let result = async {
                let transcription =
                    deepgram::connect(&providers.deepgram, addr.clone().recipient()).await?;
                let synthesis =
                    cartesia::connect(&providers.cartesia, addr.clone().recipient()).await?;
                Ok((transcription, synthesis))
            }
            .await;
            addr.do_send(ProvidersConnected { result });
        });
    }

    /// Admission decision for one `initialize` request: all three provider
    /// credentials must be configured and the registry must have a free
    /// slot. A rejected session gets the error event to relay and nothing
    /// else; no provider connection is attempted for it.
    fn admit(&self) -> Result<(), ServerEvent> {
        let missing = self.config.providers.missing_credentials();
        if !missing.is_empty() {
            warn!(
                connection_id = %self.connection_id,
                missing = ?missing,
                "Rejecting session, credentials not configured"
            );
            return Err(ServerEvent::Error {
                code: "configuration_error".to_string(),
                message: format!("Missing required credentials: {}", missing.join(", ")),
            });
        }

        self.registry.register(self.connection_id).map_err(|reason| {
            warn!(connection_id = %self.connection_id, %reason, "Session rejected");
            ServerEvent::Error {
                code: "capacity".to_string(),
                message: reason,
            }
        })
    }

    /// Tear down everything the session owns: the in-flight generation,
    /// both provider links, and the registry slot.
    fn shutdown(&mut self) -> Option<SessionInfo> {
        self.generation.cancel();
        if let Some(link) = self.transcription.take() {
            link.send(TranscriptionCommand::Close);
        }
        if let Some(link) = self.synthesis.take() {
            link.send(SynthesisCommand::Close);
        }
        self.registry.remove(&self.connection_id)
    }

    /// Forward one client audio frame to the transcription stream.
    ///
    /// Frames must hold whole 16-bit samples and be large enough to be real
    /// audio; anything else is treated as stray control traffic.
    fn handle_audio_frame(&mut self, data: &[u8]) {
        let min_len = self.config.session.min_audio_frame_bytes;
        if data.len() < min_len || data.len() % 2 != 0 {
            warn!(
                connection_id = %self.connection_id,
                len = data.len(),
                "Discarding unrecognized binary frame"
            );
            return;
        }

        match &self.transcription {
            Some(link) => {
                if !link.send(TranscriptionCommand::Audio(data.to_vec())) {
                    warn!(connection_id = %self.connection_id, "Transcription stream gone, dropping audio");
                }
            }
            None => {
                debug!(connection_id = %self.connection_id, "Audio before initialization, dropping");
            }
        }
    }

    /// Execute the side effects requested by a state transition, in order.
    fn execute(&mut self, commands: Vec<Command>, ctx: &mut ws::WebsocketContext<Self>) {
        for command in commands {
            match command {
                Command::Relay(event) => self.send_event(ctx, &event),
                Command::CancelGeneration => self.generation.cancel(),
                Command::StartGeneration { messages } => {
                    let generation_id = self.generation.start(
                        self.config.providers.openrouter.clone(),
                        &messages,
                        ctx.address().recipient(),
                    );
                    debug!(
                        connection_id = %self.connection_id,
                        generation_id,
                        turns = messages.len(),
                        "Generation started"
                    );
                }
                Command::Synthesize {
                    text,
                    context_id,
                    continuation,
                } => {
                    self.send_synthesis(SynthesisCommand::Speak {
                        text,
                        context_id,
                        continuation,
                    });
                }
                Command::FinishSynthesis { context_id } => {
                    self.send_synthesis(SynthesisCommand::Finish { context_id });
                }
                Command::CancelSynthesis { context_id } => {
                    self.send_synthesis(SynthesisCommand::Cancel { context_id });
                }
            }
        }
    }

    fn send_synthesis(&self, command: SynthesisCommand) {
        if let Some(link) = &self.synthesis {
            if !link.send(command) {
                warn!(connection_id = %self.connection_id, "Synthesis stream gone, dropping command");
            }
        }
    }
}

impl Actor for VoiceWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Voice connection opened");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if self.shutdown().is_some() {
            info!(
                connection_id = %self.connection_id,
                duration_ms = self.connected_at.elapsed().as_millis() as u64,
                "Session closed"
            );
        } else {
            debug!(connection_id = %self.connection_id, "Connection closed before initialization");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(ClientEvent::Initialize) => self.handle_initialize(ctx),
                Err(e) => {
                    // Malformed control frames are dropped; the connection
                    // stays open
                    warn!(
                        connection_id = %self.connection_id,
                        error = %e,
                        "Dropping malformed text frame"
                    );
                }
            },
            Ok(ws::Message::Binary(data)) => self.handle_audio_frame(&data),
            Ok(ws::Message::Ping(payload)) => ctx.pong(&payload),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, ?reason, "Client closed connection");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<ProvidersConnected> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: ProvidersConnected, ctx: &mut Self::Context) {
        match msg.result {
            Ok((transcription, synthesis)) => {
                self.transcription = Some(transcription);
                self.synthesis = Some(synthesis);
                self.machine = Some(SessionMachine::new());

                // The transcription provider drops idle connections, so ping
                // it for the whole session lifetime
                let interval = Duration::from_secs(self.config.session.keepalive_interval_secs);
                ctx.run_interval(interval, |act, _ctx| {
                    if let Some(link) = &act.transcription {
                        if link.send(TranscriptionCommand::KeepAlive) {
                            debug!(connection_id = %act.connection_id, "Transcription keep-alive sent");
                        }
                    }
                });

                self.send_event(ctx, &ServerEvent::Initialized {});
                info!(connection_id = %self.connection_id, "Session initialized");
            }
            Err(e) => {
                error!(connection_id = %self.connection_id, error = %e, "Provider connection failed");
                self.registry.remove(&self.connection_id);
                self.send_error(ctx, "provider_error", e.to_string());
            }
        }
    }
}

impl Handler<TranscriptionUpdate> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: TranscriptionUpdate, ctx: &mut Self::Context) {
        match &msg.0 {
            TranscriptionStreamEvent::Error(e) => {
                // The transcription pipeline is inert from here; the client
                // decides whether to reconnect
                warn!(connection_id = %self.connection_id, error = %e, "Transcription stream error");
            }
            TranscriptionStreamEvent::Closed => {
                info!(connection_id = %self.connection_id, "Transcription stream closed, ending session");
                ctx.stop();
                return;
            }
            _ => {}
        }

        let commands = match self.machine.as_mut() {
            Some(machine) => machine.on_transcription(msg.0),
            None => return,
        };
        self.execute(commands, ctx);
    }
}

impl Handler<GenerationUpdate> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: GenerationUpdate, ctx: &mut Self::Context) {
        // Updates from a cancelled request may still be queued behind the
        // interruption; the id fence drops them
        if !self.generation.is_current(msg.generation_id) {
            debug!(
                connection_id = %self.connection_id,
                generation_id = msg.generation_id,
                "Discarding update from superseded generation"
            );
            return;
        }

        if matches!(
            msg.event,
            GenerationStreamEvent::Complete(_) | GenerationStreamEvent::Error(_)
        ) {
            self.generation.finish(msg.generation_id);
        }

        let commands = match self.machine.as_mut() {
            Some(machine) => machine.on_generation(msg.event),
            None => return,
        };
        self.execute(commands, ctx);
    }
}

impl Handler<SynthesisUpdate> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SynthesisUpdate, ctx: &mut Self::Context) {
        if matches!(msg.0, SynthesisStreamEvent::Closed) {
            warn!(connection_id = %self.connection_id, "Synthesis stream closed");
            return;
        }

        let commands = match self.machine.as_mut() {
            Some(machine) => machine.on_synthesis(msg.0),
            None => return,
        };
        self.execute(commands, ctx);
    }
}

/// WebSocket endpoint: upgrades the request and starts a session actor.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "New voice connection"
    );
    let session = VoiceWebSocket::new(app_state.get_config(), app_state.registry());
    ws::start(session, &req, stream)
}
