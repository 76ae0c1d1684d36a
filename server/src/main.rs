use std::sync::Arc;

use llm_core::{LlmProvider, OllamaHttpGenerator, ProcessGenerator, TextGenerator};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tts_core::{PiperEngine, SpeechEngine, VoiceMap};

use speech_relay::{build_router, config::ServerConfig, validation::is_valid_language_code, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

fn load_engine(config: &ServerConfig) -> PiperEngine {
    if !is_valid_language_code(&config.tts_language) {
        warn!(
            "TTS_LANGUAGE {:?} does not look like a language code (expected e.g. en_US)",
            config.tts_language
        );
    }

    let voices = VoiceMap::from_file(&config.tts_map_path).unwrap_or_else(|e| {
        warn!("Could not load {}: {e:#}, using empty map.", config.tts_map_path);
        VoiceMap::default()
    });
    let engine = PiperEngine::new(voices, config.tts_language.clone());
    info!(
        "Loaded {} voice(s) for {}",
        engine.speakers().len(),
        config.tts_language
    );
    if let Some(speaker) = &config.tts_speaker {
        if !engine.speakers().contains(speaker) {
            warn!("TTS_SPEAKER {speaker:?} is not available, using the default voice");
        }
    }
    engine
}

fn load_generator(config: &ServerConfig) -> Arc<dyn TextGenerator> {
    match config.llm_provider {
        LlmProvider::Ollama => {
            info!("Generating with `{} run {}`", config.ollama_bin, config.llm_model);
            Arc::new(ProcessGenerator::ollama(&config.ollama_bin, &config.llm_model))
        }
        LlmProvider::OllamaHttp => {
            info!("Generating with {} at {}", config.llm_model, config.ollama_url);
            Arc::new(OllamaHttpGenerator::new(&config.ollama_url, &config.llm_model))
        }
    }
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting speech relay...");

    let config = ServerConfig::from_env();
    let engine: Arc<dyn SpeechEngine> = Arc::new(load_engine(&config));
    let generator = load_generator(&config);

    let addr = config.bind_addr();
    info!(
        "Server configuration loaded: max_message_chars={}, completion_grace={}ms, worker_shutdown={}ms",
        config.max_message_chars, config.completion_grace_ms, config.worker_shutdown_timeout_ms
    );

    let state = AppState::new(engine, generator, config);
    let registry = state.registry.clone();
    let app = build_router(state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on ws://{addr}/ws");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            let peers = registry.disconnect_all();
            info!("Shutting down, disconnecting {peers} peer(s)");
        })
        .await?;
    Ok(())
}
