//! Serial synthesis of text units on a blocking thread.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};
use tts_core::{clean_for_speech, encode_wav, SpeechEngine, VoiceParams};

use crate::{
    bridge::{AudioArtifact, Delivery, DeliverySender},
    cancel::CancelFlag,
    metrics::PipelineMetrics,
    segmenter::TextUnit,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The worker thread exited within the bound.
    Clean,
    /// The bound expired; the thread was left to finish its current unit.
    TimedOut,
}

#[derive(Debug, Default)]
struct WorkerReport {
    synthesized: usize,
    failed: usize,
    discarded: usize,
}

/// Owns the synthesis queue of one response cycle.
///
/// Units are synthesized one at a time in submission order. A failing unit
/// yields a [`Delivery::Failed`] and the worker moves on to the next one.
pub struct SynthesisWorker {
    tx: Option<mpsc::UnboundedSender<TextUnit>>,
    handle: JoinHandle<WorkerReport>,
    cancel: CancelFlag,
}

impl SynthesisWorker {
    pub fn spawn(
        engine: Arc<dyn SpeechEngine>,
        voice: VoiceParams,
        deliveries: DeliverySender,
        cancel: CancelFlag,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || run(rx, engine.as_ref(), &voice, &deliveries, &cancel, &metrics)
        });
        Self {
            tx: Some(tx),
            handle,
            cancel,
        }
    }

    /// Queue a unit. Never blocks; returns `false` once the worker is gone.
    pub fn submit(&self, unit: TextUnit) -> bool {
        match &self.tx {
            Some(tx) => tx.send(unit).is_ok(),
            None => false,
        }
    }

    /// Close the queue and let every queued unit be synthesized. If that
    /// takes longer than `grace`, the cycle is cancelled.
    ///
    /// The worker stays owned by the caller, so an interrupted wait can be
    /// followed by [`shutdown`](Self::shutdown).
    pub async fn finish(&mut self, grace: Duration) -> ShutdownOutcome {
        self.tx.take();
        let outcome = self.join(grace).await;
        if outcome == ShutdownOutcome::TimedOut {
            warn!(grace_ms = grace.as_millis() as u64, "synthesis did not finish in time, cancelling");
            self.cancel.cancel();
        }
        outcome
    }

    /// Stop dequeuing now. The unit in flight may finish within `timeout`;
    /// whatever is still queued is discarded.
    pub async fn shutdown(mut self, timeout: Duration) -> ShutdownOutcome {
        self.cancel.cancel();
        self.tx.take();
        self.join(timeout).await
    }

    async fn join(&mut self, limit: Duration) -> ShutdownOutcome {
        match tokio::time::timeout(limit, &mut self.handle).await {
            Ok(Ok(report)) => {
                debug!(
                    synthesized = report.synthesized,
                    failed = report.failed,
                    discarded = report.discarded,
                    "synthesis worker stopped"
                );
                ShutdownOutcome::Clean
            }
            Ok(Err(e)) => {
                warn!("synthesis worker panicked: {e}");
                ShutdownOutcome::Clean
            }
            Err(_) => ShutdownOutcome::TimedOut,
        }
    }
}

fn run(
    mut rx: mpsc::UnboundedReceiver<TextUnit>,
    engine: &dyn SpeechEngine,
    voice: &VoiceParams,
    deliveries: &DeliverySender,
    cancel: &CancelFlag,
    metrics: &PipelineMetrics,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    while let Some(unit) = rx.blocking_recv() {
        if cancel.is_cancelled() {
            report.discarded += 1;
            rx.close();
            while rx.try_recv().is_ok() {
                report.discarded += 1;
            }
            break;
        }

        let delivery = synthesize_unit(engine, voice, unit, metrics);
        match &delivery {
            Delivery::Audio(_) => report.synthesized += 1,
            Delivery::Failed { .. } => report.failed += 1,
        }
        if deliveries.send(delivery).is_err() {
            debug!("delivery bridge gone, stopping synthesis");
            break;
        }
    }
    report
}

fn synthesize_unit(
    engine: &dyn SpeechEngine,
    voice: &VoiceParams,
    unit: TextUnit,
    metrics: &PipelineMetrics,
) -> Delivery {
    let started = Instant::now();
    let spoken = clean_for_speech(&unit.text);
    let result = engine.synthesize(&spoken, voice).and_then(|out| {
        let bytes = encode_wav(&out.samples, out.sample_rate)?;
        Ok((bytes, out.sample_rate, out.duration_ms()))
    });

    match result {
        Ok((encoded_bytes, sample_rate, audio_ms)) => {
            let elapsed = started.elapsed().as_millis() as u64;
            metrics.record_synthesis(elapsed);
            debug!(chunk_id = unit.sequence_id, elapsed_ms = elapsed, audio_ms, "unit synthesized");
            Delivery::Audio(AudioArtifact {
                sequence_id: unit.sequence_id,
                sample_rate,
                encoded_bytes,
                source_text: unit.text,
            })
        }
        Err(e) => {
            metrics.record_synthesis_failure();
            warn!(chunk_id = unit.sequence_id, "audio generation failed: {e:#}");
            Delivery::Failed {
                sequence_id: unit.sequence_id,
                message: format!("Audio generation failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tts_core::{AudioSamples, Synthesized};

    /// Records what it was asked to say; fails on texts containing "fail".
    #[derive(Default)]
    struct RecordingEngine {
        seen: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl SpeechEngine for RecordingEngine {
        fn synthesize(&self, text: &str, _voice: &VoiceParams) -> anyhow::Result<Synthesized> {
            std::thread::sleep(self.delay);
            self.seen.lock().unwrap().push(text.to_string());
            if text.contains("fail") {
                anyhow::bail!("engine refused");
            }
            Ok(Synthesized {
                samples: AudioSamples::F32(vec![0.25; 160]),
                sample_rate: 16_000,
            })
        }

        fn speakers(&self) -> Vec<String> {
            Vec::new()
        }

        fn default_speaker(&self) -> Option<String> {
            None
        }

        fn language(&self) -> Option<String> {
            None
        }
    }

    fn unit(sequence_id: u64, text: &str) -> TextUnit {
        TextUnit {
            sequence_id,
            text: text.to_string(),
        }
    }

    fn spawn(
        engine: Arc<RecordingEngine>,
        cancel: CancelFlag,
    ) -> (SynthesisWorker, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SynthesisWorker::spawn(
            engine,
            VoiceParams::default(),
            tx,
            cancel,
            Arc::new(PipelineMetrics::new()),
        );
        (worker, rx)
    }

    #[tokio::test]
    async fn synthesizes_in_order_and_survives_failures() {
        let engine = Arc::new(RecordingEngine::default());
        let (mut worker, mut rx) = spawn(engine.clone(), CancelFlag::new());

        assert!(worker.submit(unit(0, "**Hello** there.")));
        assert!(worker.submit(unit(1, "This will fail.")));
        assert!(worker.submit(unit(2, "Still going.")));
        assert_eq!(worker.finish(Duration::from_secs(5)).await, ShutdownOutcome::Clean);

        let mut out = Vec::new();
        while let Some(d) = rx.recv().await {
            out.push(d);
        }
        assert_eq!(out.iter().map(Delivery::sequence_id).collect::<Vec<_>>(), vec![0, 1, 2]);
        match &out[0] {
            Delivery::Audio(a) => {
                assert_eq!(a.source_text, "**Hello** there.");
                assert_eq!(a.sample_rate, 16_000);
                assert_eq!(&a.encoded_bytes[..4], b"RIFF");
            }
            other => panic!("expected audio, got {other:?}"),
        }
        assert_eq!(
            out[1],
            Delivery::Failed {
                sequence_id: 1,
                message: "Audio generation failed: engine refused".into()
            }
        );
        // The engine sees cleaned text.
        assert_eq!(engine.seen.lock().unwrap()[0], "Hello there.");
    }

    #[tokio::test]
    async fn shutdown_discards_queued_units() {
        let engine = Arc::new(RecordingEngine {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let (worker, mut rx) = spawn(engine.clone(), CancelFlag::new());
        for id in 0..10 {
            worker.submit(unit(id, "Some words."));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(worker.shutdown(Duration::from_secs(2)).await, ShutdownOutcome::Clean);

        let mut delivered = 0;
        while rx.recv().await.is_some() {
            delivered += 1;
        }
        assert!(delivered <= 2, "delivered {delivered}");
        assert!(engine.seen.lock().unwrap().len() <= 2);
    }

    #[tokio::test]
    async fn shutdown_is_bounded_by_the_unit_in_flight() {
        let engine = Arc::new(RecordingEngine {
            delay: Duration::from_millis(400),
            ..Default::default()
        });
        let (worker, _rx) = spawn(engine, CancelFlag::new());
        worker.submit(unit(0, "Slow one."));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        let outcome = worker.shutdown(Duration::from_millis(50)).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn finish_cancels_when_grace_expires() {
        let engine = Arc::new(RecordingEngine {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let cancel = CancelFlag::new();
        let (mut worker, _rx) = spawn(engine, cancel.clone());
        worker.submit(unit(0, "One."));
        worker.submit(unit(1, "Two."));
        assert_eq!(worker.finish(Duration::from_millis(50)).await, ShutdownOutcome::TimedOut);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn interrupted_finish_can_still_shut_down() {
        let engine = Arc::new(RecordingEngine {
            delay: Duration::from_millis(100),
            ..Default::default()
        });
        let (mut worker, _rx) = spawn(engine.clone(), CancelFlag::new());
        for id in 0..5 {
            worker.submit(unit(id, "Some words."));
        }

        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            worker.finish(Duration::from_secs(5)),
        )
        .await;
        assert!(waited.is_err());

        assert_eq!(worker.shutdown(Duration::from_secs(1)).await, ShutdownOutcome::Clean);
        // The blocking thread has exited and released its engine handle.
        assert_eq!(Arc::strong_count(&engine), 1);
        assert!(engine.seen.lock().unwrap().len() <= 2);
    }
}
