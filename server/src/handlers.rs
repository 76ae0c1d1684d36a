use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::{error::ApiError, metrics::MetricsResponse, AppState};

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.pipeline.engine.speakers())
}

#[derive(Debug, Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub language: Option<String>,
    pub is_default: bool,
}

pub async fn voice_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VoiceInfo>, ApiError> {
    let engine = &state.pipeline.engine;
    if !engine.speakers().contains(&id) {
        return Err(ApiError::NotFound(format!("voice \"{id}\"")));
    }
    Ok(Json(VoiceInfo {
        is_default: engine.default_speaker().as_deref() == Some(id.as_str()),
        language: engine.language(),
        id,
    }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.pipeline.metrics.snapshot(state.registry.len()))
}
