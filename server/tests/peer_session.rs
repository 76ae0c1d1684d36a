//! Command handling of a single peer, without a socket.

mod common;

use std::sync::Arc;

use serde_json::json;
use speech_relay::{cancel::CancelFlag, ws::PeerSession};

use common::*;

fn session(
    engine: Arc<FakeEngine>,
    generator: Arc<ScriptedGenerator>,
) -> (PeerSession, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let state = app_state(engine, generator);
    let (conn, rx) = channel_peer();
    (PeerSession::new(&state, conn, CancelFlag::new()), rx)
}

fn idle_session() -> (PeerSession, tokio::sync::mpsc::UnboundedReceiver<String>) {
    session(Arc::new(FakeEngine::new()), Arc::new(ScriptedGenerator::new(&[])))
}

#[tokio::test]
async fn greets_with_tts_info() {
    let (session, mut rx) = idle_session();
    session.greet().await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(
        events,
        vec![json!({
            "type": "connected",
            "message": "Connected to TTS Assistant",
            "tts_info": {
                "language": "en_US",
                "speaker": "lessac",
                "available_speakers": ["amy", "lessac"]
            }
        })]
    );
}

#[tokio::test]
async fn ping_echoes_timestamp() {
    let (mut session, mut rx) = idle_session();
    session.handle_text(r#"{"type":"ping","timestamp":"t-42"}"#).await.unwrap();
    session.handle_text(r#"{"type":"ping"}"#).await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(events[0], json!({"type": "pong", "timestamp": "t-42"}));
    assert_eq!(events[1], json!({"type": "pong", "timestamp": ""}));
}

#[tokio::test]
async fn speaker_selection_is_per_peer() {
    let (mut first, mut first_rx) = idle_session();
    let (second, _second_rx) = idle_session();

    first.handle_text(r#"{"type":"change_speaker","speaker":"amy"}"#).await.unwrap();
    first.handle_text(r#"{"type":"change_speaker","speaker":"hal"}"#).await.unwrap();
    first.handle_text(r#"{"type":"get_speakers"}"#).await.unwrap();

    let events = drain_events(&mut first_rx);
    assert_eq!(events[0], json!({"type": "speaker_changed", "speaker": "amy"}));
    assert_eq!(
        events[1],
        json!({"type": "error", "message": "Speaker \"hal\" not available"})
    );
    assert_eq!(
        events[2],
        json!({"type": "speakers_list", "speakers": ["amy", "lessac"], "current_speaker": "amy"})
    );
    assert_eq!(first.speaker(), Some("amy"));
    assert_eq!(second.speaker(), Some("lessac"));
}

#[tokio::test]
async fn malformed_frames_get_an_error_and_the_session_continues() {
    let (mut session, mut rx) = idle_session();
    session.handle_text("not json at all").await.unwrap();
    session.handle_text(r#"{"type":"dance"}"#).await.unwrap();
    session.handle_text(r#"{"type":"ping","timestamp":1}"#).await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(events[0], json!({"type": "error", "message": "Invalid JSON format"}));
    assert_eq!(
        events[1],
        json!({"type": "error", "message": "Unknown message type: dance"})
    );
    assert_eq!(events[2], json!({"type": "pong", "timestamp": 1}));
}

#[tokio::test]
async fn blank_messages_are_ignored_and_long_ones_rejected() {
    let generator = Arc::new(ScriptedGenerator::new(&["Never said."]));
    let (mut session, mut rx) = session(Arc::new(FakeEngine::new()), generator.clone());

    session.handle_text(r#"{"type":"user_message","text":"   "}"#).await.unwrap();
    assert!(drain_events(&mut rx).is_empty());

    let long = "x".repeat(201);
    let frame = json!({"type": "user_message", "text": long}).to_string();
    session.handle_text(&frame).await.unwrap();
    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert!(events[0]["message"].as_str().unwrap().contains("too long"));
    assert!(generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn user_message_runs_a_cycle_with_the_chosen_speaker() {
    let engine = Arc::new(FakeEngine::new());
    let generator = Arc::new(ScriptedGenerator::new(&["Sure thing. ", "Here you go."]));
    let (mut session, mut rx) = session(engine.clone(), generator);

    session.handle_text(r#"{"type":"change_speaker","speaker":"amy"}"#).await.unwrap();
    session
        .handle_text(r#"{"type":"user_message","text":"  Tell me something  "}"#)
        .await
        .unwrap();

    let events = drain_events(&mut rx);
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(&types[..3], &["speaker_changed", "message_received", "ai_thinking"]);
    assert_eq!(events[1]["original_text"], "Tell me something");
    assert_eq!(*types.last().unwrap(), "response_complete");
    assert_eq!(of_type(&events, "audio_chunk").len(), 2);
    assert!(engine.speakers_used().iter().all(|s| s.as_deref() == Some("amy")));
}

#[tokio::test]
async fn failed_cycle_leaves_the_session_usable() {
    let (mut session, mut rx) = session(
        Arc::new(FakeEngine::new()),
        Arc::new(ScriptedGenerator::not_installed()),
    );

    session.handle_text(r#"{"type":"user_message","text":"hi"}"#).await.unwrap();
    session.handle_text(r#"{"type":"ping","timestamp":"after"}"#).await.unwrap();

    let events = drain_events(&mut rx);
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["message_received", "ai_thinking", "error", "pong"]);
}
