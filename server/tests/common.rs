//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use llm_core::{FragmentStream, GenerationError, TextGenerator};
use serde_json::Value;
use speech_relay::{
    config::ServerConfig,
    connection::{Connection, PeerSink},
    error::DeliveryError,
    metrics::PipelineMetrics,
    session::{CycleSettings, Pipeline},
    AppState,
};
use tokio::sync::mpsc;
use tts_core::{AudioSamples, SpeechEngine, Synthesized, VoiceParams};

pub const SAMPLE_RATE: u32 = 16_000;

/// Engine producing a short tone per call.
#[derive(Default)]
pub struct FakeEngine {
    pub delay: Duration,
    /// Texts containing this marker fail to synthesize.
    pub fail_on: Option<String>,
    pub calls: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_on: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn speakers_used(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }
}

impl SpeechEngine for FakeEngine {
    fn synthesize(&self, text: &str, voice: &VoiceParams) -> anyhow::Result<Synthesized> {
        std::thread::sleep(self.delay);
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.speaker.clone()));
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                anyhow::bail!("voice model crashed");
            }
        }
        let samples = (0..160).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        Ok(Synthesized {
            samples: AudioSamples::F32(samples),
            sample_rate: SAMPLE_RATE,
        })
    }

    fn speakers(&self) -> Vec<String> {
        vec!["amy".to_string(), "lessac".to_string()]
    }

    fn default_speaker(&self) -> Option<String> {
        Some("lessac".to_string())
    }

    fn language(&self) -> Option<String> {
        Some("en_US".to_string())
    }
}

#[derive(Clone)]
pub enum Ending {
    /// Output ends normally.
    Done,
    /// The process exits non-zero after the fragments.
    Crash(String),
    /// Output never ends.
    Hang,
}

/// Generator replaying fixed fragments.
pub struct ScriptedGenerator {
    fragments: Vec<String>,
    delay: Duration,
    ending: Ending,
    launch_fails: bool,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            delay: Duration::ZERO,
            ending: Ending::Done,
            launch_fails: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn ending(mut self, ending: Ending) -> Self {
        self.ending = ending;
        self
    }

    pub fn not_installed() -> Self {
        Self {
            launch_fails: true,
            ..Self::new(&[])
        }
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> llm_core::Result<FragmentStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.launch_fails {
            return Err(GenerationError::NotInstalled {
                program: "ollama".into(),
            });
        }

        let delay = self.delay;
        let body = stream::iter(self.fragments.clone()).then(move |fragment| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, GenerationError>(fragment)
        });
        let tail: FragmentStream = match self.ending.clone() {
            Ending::Done => Box::pin(stream::empty()),
            Ending::Crash(stderr) => Box::pin(stream::once(async move {
                Err(GenerationError::Exited {
                    status: "exit status: 1".into(),
                    stderr,
                })
            })),
            Ending::Hang => Box::pin(stream::pending()),
        };
        Ok(Box::pin(body.chain(tail)))
    }
}

/// Sink that accepts `limit` frames and then reports a broken connection.
pub struct FailingSink {
    pub tx: mpsc::UnboundedSender<String>,
    pub limit: usize,
    pub attempts: Arc<Mutex<usize>>,
}

#[async_trait]
impl PeerSink for FailingSink {
    async fn send_text(&mut self, text: String) -> Result<(), DeliveryError> {
        let mut attempts = self.attempts.lock().unwrap();
        *attempts += 1;
        if *attempts > self.limit {
            return Err(DeliveryError::Send("connection reset by peer".into()));
        }
        self.tx.send(text).map_err(|_| DeliveryError::Closed)
    }

    async fn close(&mut self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

pub fn settings() -> CycleSettings {
    CycleSettings {
        completion_grace: Duration::from_secs(5),
        worker_shutdown_timeout: Duration::from_millis(500),
        error_send_timeout: Duration::from_millis(200),
    }
}

pub fn pipeline(engine: Arc<FakeEngine>, generator: Arc<ScriptedGenerator>) -> Pipeline {
    Pipeline {
        engine,
        generator,
        metrics: Arc::new(PipelineMetrics::new()),
        settings: settings(),
    }
}

pub fn app_state(engine: Arc<FakeEngine>, generator: Arc<ScriptedGenerator>) -> AppState {
    let config = ServerConfig {
        max_message_chars: 200,
        completion_grace_ms: 5_000,
        worker_shutdown_timeout_ms: 500,
        error_send_timeout_ms: 200,
        ..ServerConfig::default()
    };
    AppState::new(engine, generator, config)
}

/// Connection whose frames land in the returned receiver.
pub fn channel_peer() -> (Connection, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Connection::new(tx), rx)
}

/// Every frame received so far, parsed.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|frame| serde_json::from_str(&frame).unwrap())
        .collect()
}

pub fn of_type<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["type"] == kind).collect()
}

pub fn chunk_ids(events: &[&Value]) -> Vec<u64> {
    events.iter().map(|e| e["chunk_id"].as_u64().unwrap()).collect()
}

/// Decode the base64 WAV of an `audio_chunk` event.
pub fn decode_audio(event: &Value) -> (hound::WavSpec, Vec<i16>) {
    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(event["audio"].as_str().unwrap())
        .unwrap();
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).unwrap();
    let spec = reader.spec();
    let samples = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    (spec, samples)
}
