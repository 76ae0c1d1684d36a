//! WebSocket sessions: one [`PeerSession`] per connected peer.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tts_core::VoiceParams;

use crate::{
    cancel::CancelFlag,
    connection::Connection,
    error::{ApiError, DeliveryError},
    protocol::{ClientMessage, ServerMessage, TtsInfo},
    session::{CycleState, Pipeline, ResponseCycle},
    validation::validate_user_message,
    AppState,
};

const WELCOME: &str = "Connected to TTS Assistant";

/// Per-peer command handling. Response cycles run inline, so commands that
/// arrive during a cycle wait until it has finished.
pub struct PeerSession {
    pipeline: Pipeline,
    conn: Connection,
    peer_gone: CancelFlag,
    speaker: Option<String>,
    max_message_chars: usize,
    cycles: u64,
}

impl PeerSession {
    pub fn new(state: &AppState, conn: Connection, peer_gone: CancelFlag) -> Self {
        Self {
            pipeline: state.pipeline.clone(),
            conn,
            peer_gone,
            speaker: state.initial_speaker(),
            max_message_chars: state.config.max_message_chars,
            cycles: 0,
        }
    }

    pub fn speaker(&self) -> Option<&str> {
        self.speaker.as_deref()
    }

    pub async fn greet(&self) -> Result<(), DeliveryError> {
        let engine = &self.pipeline.engine;
        self.conn
            .send(&ServerMessage::Connected {
                message: WELCOME.to_string(),
                tts_info: TtsInfo {
                    language: engine.language(),
                    speaker: self.speaker.clone(),
                    available_speakers: engine.speakers(),
                },
            })
            .await
    }

    /// Handle one inbound text frame. Only a broken connection is an error;
    /// bad input is answered with an `error` event.
    pub async fn handle_text(&mut self, frame: &str) -> Result<(), DeliveryError> {
        let command = match ClientMessage::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("rejected frame: {e}");
                return self.conn.send(&ServerMessage::error(e.to_string())).await;
            }
        };

        match command {
            ClientMessage::UserMessage { text } => self.user_message(&text).await,
            ClientMessage::ChangeSpeaker { speaker } => self.change_speaker(speaker).await,
            ClientMessage::GetSpeakers => {
                self.conn
                    .send(&ServerMessage::SpeakersList {
                        speakers: self.pipeline.engine.speakers(),
                        current_speaker: self.speaker.clone(),
                    })
                    .await
            }
            ClientMessage::Ping { timestamp } => {
                self.conn.send(&ServerMessage::Pong { timestamp }).await
            }
        }
    }

    async fn user_message(&mut self, text: &str) -> Result<(), DeliveryError> {
        let text = match validate_user_message(text, self.max_message_chars) {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(()),
            Err(ApiError::InvalidInput(msg) | ApiError::NotFound(msg)) => {
                return self.conn.send(&ServerMessage::error(msg)).await;
            }
        };

        info!(chars = text.chars().count(), "user message");
        self.conn
            .send(&ServerMessage::MessageReceived {
                original_text: text.to_string(),
            })
            .await?;

        let voice = VoiceParams {
            speaker: self.speaker.clone(),
            language: None,
        };
        let cycle = ResponseCycle::new(
            self.cycles,
            &self.pipeline,
            self.conn.clone(),
            voice,
            self.peer_gone.clone(),
        );
        self.cycles += 1;
        let outcome = cycle.run(text).await;
        if outcome.state == CycleState::Failed {
            debug!(units = outcome.units, error = ?outcome.error, "cycle ended in failure");
        }
        Ok(())
    }

    async fn change_speaker(&mut self, speaker: String) -> Result<(), DeliveryError> {
        if self.pipeline.engine.speakers().contains(&speaker) {
            info!(speaker = %speaker, "speaker changed");
            self.speaker = Some(speaker.clone());
            self.conn.send(&ServerMessage::SpeakerChanged { speaker }).await
        } else {
            self.conn
                .send(&ServerMessage::error(format!(
                    "Speaker \"{speaker}\" not available"
                )))
                .await
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let conn = Connection::new(sink);
    let peer_gone = CancelFlag::new();
    let registration = state.registry.register(peer_gone.clone());
    let peer = registration.id();
    state.pipeline.metrics.record_connection();

    // Reads run in their own task so a disconnect is noticed mid-cycle.
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
    let reader = tokio::spawn({
        let peer_gone = peer_gone.clone();
        async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if frames_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(peer = %peer, "websocket read error: {e}");
                        break;
                    }
                }
            }
            peer_gone.cancel();
        }
    });

    let mut session = PeerSession::new(&state, conn.clone(), peer_gone.clone());
    if let Err(e) = session.greet().await {
        warn!(peer = %peer, "could not greet peer: {e}");
        peer_gone.cancel();
    }

    while !peer_gone.is_cancelled() {
        let frame = tokio::select! {
            _ = peer_gone.cancelled() => break,
            frame = frames_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = session.handle_text(&frame).await {
            warn!(peer = %peer, "connection lost: {e}");
            break;
        }
    }

    peer_gone.cancel();
    reader.abort();
    let _ = conn.close().await;
    info!(peer = %peer, cycles = session.cycles, "session ended");
}
