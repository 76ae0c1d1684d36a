//! Hands synthesis results from the worker thread to the peer connection.

use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    cancel::CancelFlag, connection::Connection, error::DeliveryError, metrics::PipelineMetrics,
    protocol::ServerMessage,
};

/// Encoded audio for one text unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    pub sequence_id: u64,
    pub sample_rate: u32,
    pub encoded_bytes: Vec<u8>,
    pub source_text: String,
}

/// What the worker produced for one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Audio(AudioArtifact),
    Failed { sequence_id: u64, message: String },
}

impl Delivery {
    pub fn sequence_id(&self) -> u64 {
        match self {
            Delivery::Audio(artifact) => artifact.sequence_id,
            Delivery::Failed { sequence_id, .. } => *sequence_id,
        }
    }

    fn into_message(self) -> ServerMessage {
        match self {
            Delivery::Audio(artifact) => ServerMessage::AudioChunk {
                audio: tts_core::wav_to_base64(&artifact.encoded_bytes),
                chunk_id: artifact.sequence_id,
                text: artifact.source_text,
                sample_rate: artifact.sample_rate,
            },
            Delivery::Failed {
                sequence_id,
                message,
            } => ServerMessage::Error {
                message,
                chunk_id: Some(sequence_id),
            },
        }
    }
}

/// Sending side handed to the worker. Sends never block.
pub type DeliverySender = mpsc::UnboundedSender<Delivery>;

#[derive(Debug, Default)]
pub struct BridgeReport {
    pub delivered: usize,
    pub failure: Option<DeliveryError>,
}

/// Single dispatch task writing worker results to the peer in arrival order.
///
/// A failed write cancels the cycle; nothing is written after cancellation.
pub struct DeliveryBridge {
    task: JoinHandle<BridgeReport>,
    cancel: CancelFlag,
}

impl DeliveryBridge {
    /// Start the dispatch task. It runs until every clone of the returned
    /// sender is dropped or the cycle is cancelled.
    pub fn spawn(
        conn: Connection,
        cancel: CancelFlag,
        metrics: Arc<PipelineMetrics>,
    ) -> (Self, DeliverySender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch(rx, conn, cancel.clone(), metrics));
        (Self { task, cancel }, tx)
    }

    /// Wait for queued deliveries to be written. Past `within` the cycle is
    /// cancelled and the task aborted.
    pub async fn drain(mut self, within: Duration) -> BridgeReport {
        match tokio::time::timeout(within, &mut self.task).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!("delivery bridge task failed: {e}");
                BridgeReport::default()
            }
            Err(_) => {
                warn!(within_ms = within.as_millis() as u64, "delivery bridge did not drain in time");
                self.cancel.cancel();
                self.task.abort();
                BridgeReport::default()
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    conn: Connection,
    cancel: CancelFlag,
    metrics: Arc<PipelineMetrics>,
) -> BridgeReport {
    let mut report = BridgeReport::default();
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            delivery = rx.recv() => delivery,
        };
        let Some(delivery) = delivery else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }
        let chunk_id = delivery.sequence_id();
        let is_audio = matches!(delivery, Delivery::Audio(_));
        match conn.send(&delivery.into_message()).await {
            Ok(()) => {
                report.delivered += 1;
                if is_audio {
                    metrics.record_audio_chunk();
                }
                debug!(chunk_id, is_audio, "delivered");
            }
            Err(e) => {
                warn!(chunk_id, "delivery failed: {e}");
                cancel.cancel();
                report.failure = Some(e);
                break;
            }
        }
    }
    if cancel.is_cancelled() {
        debug!(delivered = report.delivered, "cycle cancelled, pending deliveries dropped");
    }
    report
}
