//! Streaming speech relay.
//!
//! A peer sends a message over a WebSocket; the reply is generated as a text
//! stream, cut into sentences, and each sentence is sent back both as text and
//! as synthesized WAV audio while generation is still running.

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod segmenter;
pub mod session;
pub mod validation;
pub mod worker;
pub mod ws;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use llm_core::TextGenerator;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::SpeechEngine;

use crate::{
    config::ServerConfig,
    metrics::PipelineMetrics,
    registry::SessionRegistry,
    session::{CycleSettings, Pipeline},
};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub registry: Arc<SessionRegistry>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn SpeechEngine>,
        generator: Arc<dyn TextGenerator>,
        config: ServerConfig,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                engine,
                generator,
                metrics: Arc::new(PipelineMetrics::new()),
                settings: CycleSettings::from(&config),
            },
            registry: Arc::new(SessionRegistry::new()),
            config: Arc::new(config),
        }
    }

    /// Speaker a new peer starts with: the configured one if the engine has
    /// it, otherwise the engine's default.
    pub fn initial_speaker(&self) -> Option<String> {
        let engine = &self.pipeline.engine;
        match &self.config.tts_speaker {
            Some(speaker) if engine.speakers().contains(speaker) => Some(speaker.clone()),
            _ => engine.default_speaker(),
        }
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let permissive = || {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers(Any)
    };

    let Some(allowed) = &config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return permissive();
    };

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        return permissive();
    }

    info!("CORS configured for {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

/// All routes, mounted both at the root and under `/api`.
pub fn build_router(state: AppState) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .into_inner();

    let api = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/voices", get(handlers::list_voices))
        .route("/voices/{id}", get(handlers::voice_detail))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(middleware_stack)
        .with_state(state)
}
