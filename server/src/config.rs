// Configuration for the relay server

use std::time::Duration;

use llm_core::LlmProvider;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tts_map_path: String,
    pub tts_language: String,
    pub tts_speaker: Option<String>,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub ollama_bin: String,
    pub ollama_url: String,
    pub max_message_chars: usize,
    pub worker_shutdown_timeout_ms: u64,
    pub completion_grace_ms: u64,
    pub error_send_timeout_ms: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            tts_map_path: "models/map.json".to_string(),
            tts_language: "en_US".to_string(),
            tts_speaker: None,
            llm_provider: LlmProvider::Ollama,
            llm_model: "llama3.2".to_string(),
            ollama_bin: "ollama".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            max_message_chars: 5000,
            worker_shutdown_timeout_ms: 2000,
            completion_grace_ms: 60_000,
            error_send_timeout_ms: 1000,
            cors_allowed_origins: None,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let llm_provider = match env_string("LLM_PROVIDER") {
            Some(name) => LlmProvider::parse(&name).unwrap_or_else(|| {
                tracing::warn!(provider = %name, "unknown LLM_PROVIDER, using ollama");
                LlmProvider::Ollama
            }),
            None => defaults.llm_provider,
        };

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            host: env_string("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            tts_map_path: env_string("TTS_MAP_PATH").unwrap_or(defaults.tts_map_path),
            tts_language: env_string("TTS_LANGUAGE").unwrap_or(defaults.tts_language),
            tts_speaker: env_string("TTS_SPEAKER"),
            llm_provider,
            llm_model: env_string("LLM_MODEL").unwrap_or(defaults.llm_model),
            ollama_bin: env_string("OLLAMA_BIN").unwrap_or(defaults.ollama_bin),
            ollama_url: env_string("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            max_message_chars: env_parse("MAX_MESSAGE_CHARS").unwrap_or(defaults.max_message_chars),
            worker_shutdown_timeout_ms: env_parse("WORKER_SHUTDOWN_TIMEOUT_MS")
                .unwrap_or(defaults.worker_shutdown_timeout_ms),
            completion_grace_ms: env_parse("COMPLETION_GRACE_MS")
                .unwrap_or(defaults.completion_grace_ms),
            error_send_timeout_ms: env_parse("ERROR_SEND_TIMEOUT_MS")
                .unwrap_or(defaults.error_send_timeout_ms),
            cors_allowed_origins,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn worker_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_shutdown_timeout_ms)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }

    pub fn error_send_timeout(&self) -> Duration {
        Duration::from_millis(self.error_send_timeout_ms)
    }
}
