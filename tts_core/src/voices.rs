use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Voice id used for legacy entries that name a single config file.
pub const LEGACY_VOICE_ID: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub config: String,
    #[serde(default)]
    pub speaker_id: Option<i64>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageVoices {
    pub default_voice: String,
    pub voices: BTreeMap<String, VoiceEntry>,
}

// Accepted shapes of a language entry in map.json.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Voices {
        default_voice: String,
        voices: BTreeMap<String, VoiceEntry>,
    },
    Config {
        config: String,
        #[serde(default)]
        default_speaker: Option<i64>,
    },
    Path(String),
}

impl From<RawEntry> for LanguageVoices {
    fn from(raw: RawEntry) -> Self {
        let single = |config: String, speaker_id: Option<i64>| LanguageVoices {
            default_voice: LEGACY_VOICE_ID.to_string(),
            voices: BTreeMap::from([(
                LEGACY_VOICE_ID.to_string(),
                VoiceEntry {
                    config,
                    speaker_id,
                    display_name: None,
                    gender: None,
                    quality: None,
                },
            )]),
        };
        match raw {
            RawEntry::Voices { default_voice, voices } => LanguageVoices { default_voice, voices },
            RawEntry::Config { config, default_speaker } => single(config, default_speaker),
            RawEntry::Path(config) => single(config, None),
        }
    }
}

/// Language key -> voices, as described by `models/map.json`.
///
/// ```json
/// {
///   "en_US": {
///     "default_voice": "lessac",
///     "voices": { "lessac": { "config": "models/en_US/lessac.onnx.json" } }
///   },
///   "de_DE": "models/de_DE/thorsten.onnx.json"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceMap {
    languages: BTreeMap<String, LanguageVoices>,
}

impl VoiceMap {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, RawEntry> =
            serde_json::from_str(text).context("voice map must be a JSON object of language entries")?;

        let mut languages = BTreeMap::new();
        for (lang, entry) in raw {
            let voices = LanguageVoices::from(entry);
            if !voices.voices.contains_key(&voices.default_voice) {
                anyhow::bail!(
                    "default voice '{}' for language {} is not listed in its voices",
                    voices.default_voice,
                    lang
                );
            }
            languages.insert(lang, voices);
        }
        Ok(Self { languages })
    }

    pub fn from_file<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(p.as_ref())
            .with_context(|| format!("Failed to load {}", p.as_ref().display()))?;
        Self::from_json(&text)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub fn language(&self, lang: &str) -> Option<&LanguageVoices> {
        self.languages.get(lang)
    }

    /// Resolve a voice for a language; `None` picks the language default.
    pub fn resolve(&self, lang: &str, voice: Option<&str>) -> anyhow::Result<&VoiceEntry> {
        let entry = self
            .languages
            .get(lang)
            .ok_or_else(|| anyhow::anyhow!("Unknown language key: {lang}"))?;
        let voice_id = voice.unwrap_or(&entry.default_voice);
        entry.voices.get(voice_id).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown voice '{}' for language '{}'. Available voices: {}",
                voice_id,
                lang,
                entry.voices.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }
}
