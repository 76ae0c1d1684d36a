use std::{
    fs,
    path::Path,
    sync::{Arc, RwLock},
    time::Instant,
};

use anyhow::Context;
use dashmap::DashMap;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::{debug, info};

use crate::{AudioSamples, SpeechEngine, Synthesized, VoiceMap, VoiceParams, DEFAULT_SAMPLE_RATE};

// Cached synthesizer and sample rate
struct CachedSynth {
    synth: Arc<RwLock<PiperSpeechSynthesizer>>,
    sample_rate: u32,
    last_accessed: Instant,
}

/// Piper voices for one language, backed by a [`VoiceMap`].
///
/// Synthesizers are loaded lazily per model config and kept in a small
/// cache, evicting the least recently used one when full.
pub struct PiperEngine {
    voices: VoiceMap,
    language: String,
    cache: DashMap<String, CachedSynth>,
    max_cache_size: usize,
}

impl PiperEngine {
    pub fn new(voices: VoiceMap, language: impl Into<String>) -> Self {
        Self {
            voices,
            language: language.into(),
            cache: DashMap::new(),
            max_cache_size: 4,
        }
    }

    /// Load the voice map from a `map.json` file.
    pub fn from_map_file<P: AsRef<Path>>(p: P, language: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self::new(VoiceMap::from_file(p)?, language))
    }

    pub fn with_cache_size(mut self, max_cache_size: usize) -> Self {
        self.max_cache_size = max_cache_size.max(1);
        self
    }

    /// Read `audio.sample_rate` from a Piper model config.
    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", cfg_path.as_ref().display()))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).context("Config file is not valid JSON")?;

        Ok(json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .map(|sr| sr as u32)
            .unwrap_or(DEFAULT_SAMPLE_RATE))
    }

    fn synth_for(&self, cfg_path: &str) -> anyhow::Result<(Arc<RwLock<PiperSpeechSynthesizer>>, u32)> {
        if let Some(mut cached) = self.cache.get_mut(cfg_path) {
            cached.last_accessed = Instant::now();
            return Ok((cached.synth.clone(), cached.sample_rate));
        }

        info!(config = cfg_path, "loading piper model");
        let sample_rate = Self::read_sample_rate(cfg_path)?;
        let model = piper_rs::from_config_path(Path::new(cfg_path))
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)
            .map_err(|e| anyhow::anyhow!("piper init error: {e}"))?;
        let synth = Arc::new(RwLock::new(synth));

        if self.cache.len() >= self.max_cache_size {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.last_accessed)
                .map(|entry| entry.key().clone());
            if let Some(key) = oldest {
                debug!(config = %key, "evicting cached piper model");
                self.cache.remove(&key);
            }
        }

        self.cache.insert(
            cfg_path.to_string(),
            CachedSynth {
                synth: synth.clone(),
                sample_rate,
                last_accessed: Instant::now(),
            },
        );
        Ok((synth, sample_rate))
    }
}

impl SpeechEngine for PiperEngine {
    fn synthesize(&self, text: &str, voice: &VoiceParams) -> anyhow::Result<Synthesized> {
        let language = voice.language.as_deref().unwrap_or(&self.language);
        let entry = self.voices.resolve(language, voice.speaker.as_deref())?;
        let (synth_arc, sample_rate) = self.synth_for(&entry.config)?;

        let synth = synth_arc
            .read()
            .map_err(|_| anyhow::anyhow!("Synthesizer lock poisoned"))?;

        let iter: PiperSpeechStreamParallel = synth
            .synthesize_parallel(text.to_string(), None)
            .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

        let mut samples: Vec<f32> = Vec::new();
        for part in iter {
            samples.extend(part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?.into_vec());
        }

        Ok(Synthesized {
            samples: AudioSamples::F32(samples),
            sample_rate,
        })
    }

    fn speakers(&self) -> Vec<String> {
        self.voices
            .language(&self.language)
            .map(|l| l.voices.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn default_speaker(&self) -> Option<String> {
        self.voices.language(&self.language).map(|l| l.default_voice.clone())
    }

    fn language(&self) -> Option<String> {
        Some(self.language.clone())
    }
}
