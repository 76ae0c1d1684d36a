//! Wire protocol: one JSON object per WebSocket text frame, discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtsInfo {
    pub language: Option<String>,
    pub speaker: Option<String>,
    pub available_speakers: Vec<String>,
}

/// Events sent to the peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        message: String,
        tts_info: TtsInfo,
    },
    MessageReceived {
        original_text: String,
    },
    AiThinking {
        message: String,
    },
    TextChunk {
        text: String,
        chunk_id: u64,
    },
    AudioChunk {
        /// Base64 of a mono 16-bit PCM WAV file.
        audio: String,
        chunk_id: u64,
        text: String,
        sample_rate: u32,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        chunk_id: Option<u64>,
    },
    ResponseComplete {
        full_text: String,
    },
    SpeakerChanged {
        speaker: String,
    },
    SpeakersList {
        speakers: Vec<String>,
        current_speaker: Option<String>,
    },
    Pong {
        timestamp: Value,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            chunk_id: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn empty_timestamp() -> Value {
    Value::String(String::new())
}

/// Commands received from the peer. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserMessage {
        #[serde(default)]
        text: String,
    },
    ChangeSpeaker {
        #[serde(default)]
        speaker: String,
    },
    GetSpeakers,
    Ping {
        #[serde(default = "empty_timestamp")]
        timestamp: Value,
    },
}

const KNOWN_TYPES: [&str; 4] = ["user_message", "change_speaker", "get_speakers", "ping"];

impl ClientMessage {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame).map_err(|_| ProtocolError::InvalidJson)?;
        let kind = match &value {
            Value::Object(map) => map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => return Err(ProtocolError::InvalidJson),
        };
        if !KNOWN_TYPES.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|_| ProtocolError::InvalidJson)
    }
}
