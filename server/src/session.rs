//! One response cycle: from a user message to `response_complete`.
//!
//! The cycle owns a [`Segmenter`], a [`SynthesisWorker`] and a
//! [`DeliveryBridge`]; none of them outlive it. Text units are written to the
//! peer inline as they are segmented while audio follows through the worker
//! and the bridge, so the two kinds of events interleave and are tied
//! together by `chunk_id`.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use llm_core::{prompt::build_prompt, FragmentStream, TextGenerator};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tts_core::{SpeechEngine, VoiceParams};

use crate::{
    bridge::DeliveryBridge,
    cancel::CancelFlag,
    config::ServerConfig,
    connection::Connection,
    error::SessionError,
    metrics::PipelineMetrics,
    protocol::ServerMessage,
    segmenter::{Segmenter, TextUnit},
    worker::{ShutdownOutcome, SynthesisWorker},
};

const THINKING_MESSAGE: &str = "AI is processing your request...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Thinking,
    Streaming,
    Completing,
    Closed,
    Failed,
}

impl CycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CycleState::Closed | CycleState::Failed)
    }

    /// Forward-only: each step moves to the next state, and any live state may fail.
    pub fn can_advance_to(self, next: CycleState) -> bool {
        use CycleState::*;
        matches!(
            (self, next),
            (Idle, Thinking)
                | (Thinking, Streaming)
                | (Streaming, Completing)
                | (Completing, Closed)
                | (Idle | Thinking | Streaming | Completing, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    pub completion_grace: Duration,
    pub worker_shutdown_timeout: Duration,
    pub error_send_timeout: Duration,
}

impl From<&ServerConfig> for CycleSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            completion_grace: config.completion_grace(),
            worker_shutdown_timeout: config.worker_shutdown_timeout(),
            error_send_timeout: config.error_send_timeout(),
        }
    }
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Collaborators shared by every cycle on the server.
#[derive(Clone)]
pub struct Pipeline {
    pub engine: Arc<dyn SpeechEngine>,
    pub generator: Arc<dyn TextGenerator>,
    pub metrics: Arc<PipelineMetrics>,
    pub settings: CycleSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub state: CycleState,
    pub units: u64,
    pub full_text: String,
    pub error: Option<String>,
}

pub struct ResponseCycle {
    id: u64,
    state: CycleState,
    pipeline: Pipeline,
    conn: Connection,
    voice: VoiceParams,
    peer_gone: CancelFlag,
    cancel: CancelFlag,
    spoken: Vec<String>,
}

impl ResponseCycle {
    /// `peer_gone` is the connection-wide flag set when the peer disconnects.
    pub fn new(
        id: u64,
        pipeline: &Pipeline,
        conn: Connection,
        voice: VoiceParams,
        peer_gone: CancelFlag,
    ) -> Self {
        Self {
            id,
            state: CycleState::Idle,
            pipeline: pipeline.clone(),
            conn,
            voice,
            peer_gone,
            cancel: CancelFlag::new(),
            spoken: Vec::new(),
        }
    }

    /// Drive the cycle to CLOSED or FAILED.
    pub async fn run(mut self, user_text: &str) -> CycleOutcome {
        self.pipeline.metrics.record_cycle_started();
        self.transition(CycleState::Thinking);

        let (bridge, deliveries) = DeliveryBridge::spawn(
            self.conn.clone(),
            self.cancel.clone(),
            self.pipeline.metrics.clone(),
        );
        let worker = SynthesisWorker::spawn(
            self.pipeline.engine.clone(),
            self.voice.clone(),
            deliveries,
            self.cancel.clone(),
            self.pipeline.metrics.clone(),
        );

        let mut segmenter = Segmenter::new();
        let result = match self.stream(user_text, &mut segmenter, &worker).await {
            Ok(()) => self.complete(segmenter, worker, bridge).await,
            Err(e) => Err(self.teardown(e, worker, bridge).await),
        };

        match result {
            Ok(full_text) => {
                self.transition(CycleState::Closed);
                self.pipeline.metrics.record_cycle_completed();
                info!(cycle = self.id, units = self.spoken.len(), "response complete");
                CycleOutcome {
                    state: self.state,
                    units: self.spoken.len() as u64,
                    full_text,
                    error: None,
                }
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn stream(
        &mut self,
        user_text: &str,
        segmenter: &mut Segmenter,
        worker: &SynthesisWorker,
    ) -> Result<(), SessionError> {
        self.conn
            .send(&ServerMessage::AiThinking {
                message: THINKING_MESSAGE.to_string(),
            })
            .await?;

        let mut fragments: FragmentStream =
            self.pipeline.generator.generate(&build_prompt(user_text))?;
        self.transition(CycleState::Streaming);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.peer_gone.cancelled() => return Err(SessionError::PeerGone),
                _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                next = fragments.next() => next,
            };
            match next {
                Some(Ok(fragment)) => {
                    for unit in segmenter.feed(&fragment) {
                        self.emit(unit, worker).await?;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        debug!(cycle = self.id, "generation finished");
        Ok(())
    }

    /// Text first, then synthesis, so a unit's `text_chunk` always precedes its audio.
    async fn emit(&mut self, unit: TextUnit, worker: &SynthesisWorker) -> Result<(), SessionError> {
        debug!(cycle = self.id, chunk_id = unit.sequence_id, text = %unit.text, "text unit");
        self.conn
            .send(&ServerMessage::TextChunk {
                text: unit.text.clone(),
                chunk_id: unit.sequence_id,
            })
            .await?;
        self.pipeline.metrics.record_text_unit();
        self.spoken.push(unit.text.clone());
        if !worker.submit(unit) {
            return Err(SessionError::Internal("synthesis worker stopped".into()));
        }
        Ok(())
    }

    async fn complete(
        &mut self,
        mut segmenter: Segmenter,
        mut worker: SynthesisWorker,
        bridge: DeliveryBridge,
    ) -> Result<String, SessionError> {
        self.transition(CycleState::Completing);
        if let Some(unit) = segmenter.flush() {
            if let Err(e) = self.emit(unit, &worker).await {
                return Err(self.teardown(e, worker, bridge).await);
            }
        }

        let grace = self.pipeline.settings.completion_grace;
        let deadline = Instant::now() + grace;
        let finished = tokio::select! {
            outcome = worker.finish(grace) => Some(outcome),
            _ = self.peer_gone.cancelled() => None,
        };
        match finished {
            Some(ShutdownOutcome::Clean) => {}
            Some(ShutdownOutcome::TimedOut) => {
                warn!(cycle = self.id, "audio still pending after completion grace, dropped");
                let timeout = self.pipeline.settings.worker_shutdown_timeout;
                if worker.shutdown(timeout).await == ShutdownOutcome::TimedOut {
                    warn!(cycle = self.id, "synthesis worker still busy after shutdown timeout");
                }
            }
            None => return Err(self.teardown(SessionError::PeerGone, worker, bridge).await),
        }
        let report = bridge
            .drain(deadline.saturating_duration_since(Instant::now()))
            .await;
        if let Some(failure) = report.failure {
            return Err(failure.into());
        }
        if self.peer_gone.is_cancelled() {
            return Err(SessionError::PeerGone);
        }

        let full_text = self.spoken.join(" ");
        self.conn
            .send(&ServerMessage::ResponseComplete {
                full_text: full_text.clone(),
            })
            .await?;
        Ok(full_text)
    }

    /// Stop the worker and the bridge. A delivery failure recorded by the
    /// bridge takes precedence over the cancellation it caused.
    async fn teardown(
        &self,
        cause: SessionError,
        worker: SynthesisWorker,
        bridge: DeliveryBridge,
    ) -> SessionError {
        self.cancel.cancel();
        let timeout = self.pipeline.settings.worker_shutdown_timeout;
        if worker.shutdown(timeout).await == ShutdownOutcome::TimedOut {
            warn!(cycle = self.id, "synthesis worker still busy after shutdown timeout");
        }
        let report = bridge.drain(timeout).await;
        match (cause, report.failure) {
            (SessionError::Cancelled, Some(failure)) => failure.into(),
            (cause, _) => cause,
        }
    }

    async fn fail(mut self, e: SessionError) -> CycleOutcome {
        self.cancel.cancel();
        self.transition(CycleState::Failed);
        self.pipeline.metrics.record_cycle_failed();

        let message = e.to_string();
        if e.peer_reachable() && !self.peer_gone.is_cancelled() {
            error!(cycle = self.id, "response cycle failed: {message}");
            let event = ServerMessage::error(message.clone());
            if let Err(send_err) = self
                .conn
                .send_within(&event, self.pipeline.settings.error_send_timeout)
                .await
            {
                debug!(cycle = self.id, "could not report failure to peer: {send_err}");
            }
        } else {
            info!(cycle = self.id, "response cycle aborted: {message}");
        }

        CycleOutcome {
            state: self.state,
            units: self.spoken.len() as u64,
            full_text: self.spoken.join(" "),
            error: Some(message),
        }
    }

    fn transition(&mut self, next: CycleState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal cycle transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(cycle = self.id, from = ?self.state, to = ?next, "cycle state");
        self.state = next;
    }
}
