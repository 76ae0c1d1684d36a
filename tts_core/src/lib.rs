//! Speech synthesis for the relay: the engine seam, the Piper-backed
//! engine, and WAV encoding of synthesized audio.

mod piper;
mod text;
mod voices;
mod wav;

pub use piper::PiperEngine;
pub use text::clean_for_speech;
pub use voices::{LanguageVoices, VoiceEntry, VoiceMap, LEGACY_VOICE_ID};
pub use wav::{encode_wav, f32_to_i16, wav_to_base64};

/// Sample rate assumed when a model config does not declare one.
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// Voice parameters applied to every synthesis call of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceParams {
    pub speaker: Option<String>,
    pub language: Option<String>,
}

/// Raw sample buffer produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSamples {
    /// Float samples, nominally in [-1.0, 1.0].
    F32(Vec<f32>),
    /// Samples already in 16-bit PCM.
    I16(Vec<i16>),
}

impl AudioSamples {
    pub fn len(&self) -> usize {
        match self {
            AudioSamples::F32(s) => s.len(),
            AudioSamples::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of one synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesized {
    pub samples: AudioSamples,
    pub sample_rate: u32,
}

impl Synthesized {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Text-to-speech engine.
///
/// `synthesize` is blocking and may be slow; callers run it off the async
/// runtime. Implementations must be shareable across sessions.
pub trait SpeechEngine: Send + Sync {
    fn synthesize(&self, text: &str, voice: &VoiceParams) -> anyhow::Result<Synthesized>;

    /// Speakers selectable for this engine's language. Empty when the
    /// engine has a single voice.
    fn speakers(&self) -> Vec<String>;

    fn default_speaker(&self) -> Option<String>;

    fn language(&self) -> Option<String>;
}
