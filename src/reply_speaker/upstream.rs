//! Direct client for the upstream provider's WebSocket TTS protocol.
//!
//! Protocol: connect with `Authorization: Bearer <key>` and `VoiceType`
//! headers, send one JSON request frame, then receive JSON frames carrying
//! base64 audio in `data`. A frame with a negative `sequence` (or a Close)
//! ends the stream. Binary frames are taken as raw audio.

use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::audio::{decode_audio_blocking, AudioBuffer};
use super::client::{SynthesisRequest, Synthesizer};
use crate::config::TTSConfig;
use crate::error::SynthesisError;

#[derive(Debug, Deserialize)]
struct AudioFrame {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    sequence: i64,
}

pub struct UpstreamSynthesizer {
    url: String,
    api_key: Option<String>,
    encoding: String,
}

fn transport(e: impl std::fmt::Display) -> SynthesisError {
    SynthesisError::Transport(e.to_string())
}

fn header_value(value: &str) -> Result<HeaderValue, SynthesisError> {
    HeaderValue::from_str(value).map_err(|e| transport(format!("invalid header value: {e}")))
}

impl UpstreamSynthesizer {
    pub fn new(config: &TTSConfig) -> Self {
        Self::with_url(&config.upstream_url, config.api_key(), &config.encoding)
    }

    pub fn with_url(url: &str, api_key: Option<String>, encoding: &str) -> Self {
        Self {
            url: url.to_string(),
            api_key,
            encoding: encoding.to_string(),
        }
    }

    async fn collect_payload(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        let mut ws_request = self.url.as_str().into_client_request().map_err(transport)?;
        let headers = ws_request.headers_mut();
        if let Some(key) = &self.api_key {
            headers.insert("Authorization", header_value(&format!("Bearer {key}"))?);
        }
        headers.insert("VoiceType", header_value(&request.voice_type)?);

        let (mut ws, _) = connect_async(ws_request).await.map_err(transport)?;

        let frame = json!({
            "audio": {
                "voice_type": request.voice_type,
                "encoding": self.encoding,
                "speed_ratio": request.speed_ratio,
            },
            "request": {
                "text": request.text,
            },
        });
        ws.send(Message::Text(frame.to_string()))
            .await
            .map_err(transport)?;

        let mut payload = Vec::new();
        while let Some(message) = ws.next().await {
            match message.map_err(transport)? {
                Message::Text(text) => {
                    let frame: AudioFrame = match serde_json::from_str(&text) {
                        Ok(f) => f,
                        Err(e) => {
                            warn!("Ignoring malformed TTS frame: {e}");
                            continue;
                        }
                    };
                    if let Some(data) = frame.data.filter(|d| !d.is_empty()) {
                        let chunk = STANDARD
                            .decode(data.as_bytes())
                            .map_err(|e| SynthesisError::Decode(format!("invalid base64 audio: {e}")))?;
                        payload.extend_from_slice(&chunk);
                    }
                    if frame.sequence < 0 {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
                Message::Binary(bytes) => payload.extend_from_slice(&bytes),
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(payload)
    }
}

#[async_trait]
impl Synthesizer for UpstreamSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, SynthesisError> {
        let t0 = Instant::now();
        let payload = self.collect_payload(request).await?;
        if payload.is_empty() {
            return Err(SynthesisError::EmptyPayload);
        }
        let payload_len = payload.len();
        let audio = decode_audio_blocking(payload).await?;
        debug!(
            "Upstream synthesized {payload_len} bytes in {:.0}ms",
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(audio)
    }
}
