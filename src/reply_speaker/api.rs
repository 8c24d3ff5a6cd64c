//! Local HTTP control API.
//!
//! Exposes the controller's operations to a chat front-end (or the
//! `feed-reply` tool) on localhost using axum. Every response is JSON with a
//! `status` of `"ok"`-style text or `"error"`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::controller::{SessionId, SpeechHandle, SpeechStatus};
use super::voices::{Voice, VoiceCatalog};
use crate::config::clamp_speed;
use crate::error::ControlError;

#[derive(Clone)]
pub struct SpeechApiState {
    pub speech: SpeechHandle,
    pub catalog: Arc<VoiceCatalog>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct StartRequest {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct TextRequest {
    session: SessionId,
    delta: String,
}

#[derive(Deserialize)]
struct FinishRequest {
    session: SessionId,
}

#[derive(Deserialize)]
struct SetVoiceRequest {
    voice: String,
}

#[derive(Deserialize)]
struct SetSpeedRequest {
    speed: f32,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: SpeechStatus,
    /// Nothing left to synthesize or play.
    idle: bool,
    enabled: bool,
    voice: Option<String>,
    speed: f32,
}

#[derive(Serialize)]
struct VoicesResponse {
    status: &'static str,
    voices: Vec<Voice>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            session: None,
            voice: None,
            speed: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::ok("error")
        }
    }

    fn from_result(result: Result<(), ControlError>, status: &str) -> Json<Self> {
        Json(match result {
            Ok(()) => Self::ok(status),
            Err(e) => Self::err(e.to_string()),
        })
    }
}

/// Build the axum router.
pub fn router(state: SpeechApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/voices", get(handle_voices))
        .route("/session/start", post(handle_start))
        .route("/session/text", post(handle_text))
        .route("/session/finish", post(handle_finish))
        .route("/session/cancel", post(handle_cancel))
        .route("/pause", post(handle_pause))
        .route("/resume", post(handle_resume))
        .route("/stop", post(handle_stop))
        .route("/set-voice", post(handle_set_voice))
        .route("/set-speed", post(handle_set_speed))
        .route("/enable", post(handle_enable))
        .route("/disable", post(handle_disable))
        .with_state(state)
}

/// Serve the API as a background tokio task. Returns the bound address, or
/// `None` if the address could not be bound.
pub async fn start_api(state: SpeechApiState, addr: &str) -> Option<SocketAddr> {
    let app = router(state);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind speech API on {addr}: {e}");
            return None;
        }
    };
    let local = listener.local_addr().ok();
    info!("Speech API listening on {}", local.map_or_else(|| addr.to_string(), |a| a.to_string()));

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Speech API server error: {e}");
        }
    });
    local
}

// --- Handlers ---

async fn handle_status(State(state): State<SpeechApiState>) -> Result<Json<StatusResponse>, Json<SimpleResponse>> {
    let closed = |e: ControlError| Json(SimpleResponse::err(e.to_string()));
    let status = state.speech.status().await.map_err(closed)?;
    let settings = state.speech.settings().await.map_err(closed)?;
    let idle = state.speech.is_idle().await.map_err(closed)?;
    Ok(Json(StatusResponse {
        status,
        idle,
        enabled: settings.enabled,
        voice: settings.voice,
        speed: settings.speed,
    }))
}

async fn handle_voices(State(state): State<SpeechApiState>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        status: "ok",
        voices: state.catalog.voices().to_vec(),
    })
}

async fn handle_start(
    State(state): State<SpeechApiState>,
    Json(req): Json<StartRequest>,
) -> Json<SimpleResponse> {
    let preview: String = req.text.chars().take(80).collect();
    info!("HTTP /session/start: \"{}\"", preview.replace('\n', " "));

    match state.speech.start_session(req.text).await {
        Ok(Some(session)) => Json(SimpleResponse {
            session: Some(session),
            ..SimpleResponse::ok("started")
        }),
        Ok(None) => Json(SimpleResponse::err("speech is disabled or no voice is set")),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_text(
    State(state): State<SpeechApiState>,
    Json(req): Json<TextRequest>,
) -> Json<SimpleResponse> {
    let result = state.speech.add_text(req.session, req.delta).await;
    SimpleResponse::from_result(result, "ok")
}

async fn handle_finish(
    State(state): State<SpeechApiState>,
    Json(req): Json<FinishRequest>,
) -> Json<SimpleResponse> {
    let result = state.speech.finish_session(req.session).await;
    SimpleResponse::from_result(result, "finished")
}

async fn handle_cancel(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result(state.speech.cancel_session().await, "cancelled")
}

async fn handle_pause(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result(state.speech.pause().await, "paused")
}

async fn handle_resume(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result(state.speech.resume().await, "resumed")
}

async fn handle_stop(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result(state.speech.stop().await, "stopped")
}

async fn handle_set_voice(
    State(state): State<SpeechApiState>,
    Json(req): Json<SetVoiceRequest>,
) -> Json<SimpleResponse> {
    let voice = req.voice.trim().to_string();
    if !state.catalog.is_empty() && state.catalog.find(&voice).is_none() {
        return Json(SimpleResponse::err(format!("Unknown voice: {voice}")));
    }

    match state.speech.set_voice(voice.clone()).await {
        Ok(()) => Json(SimpleResponse {
            voice: Some(voice),
            ..SimpleResponse::ok("ok")
        }),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_set_speed(
    State(state): State<SpeechApiState>,
    Json(req): Json<SetSpeedRequest>,
) -> Json<SimpleResponse> {
    if !req.speed.is_finite() {
        return Json(SimpleResponse::err("speed must be a number"));
    }
    let speed = clamp_speed(req.speed);
    match state.speech.set_speed(speed).await {
        Ok(()) => Json(SimpleResponse {
            speed: Some(speed),
            ..SimpleResponse::ok("ok")
        }),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_enable(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result(state.speech.enable().await, "enabled")
}

async fn handle_disable(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    SimpleResponse::from_result(state.speech.disable().await, "disabled")
}
