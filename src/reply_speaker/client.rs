//! Speech synthesis clients.
//!
//! A [`Synthesizer`] turns one segment into one complete [`AudioBuffer`].
//! The HTTP client posts `{text, voice_type, speed_ratio}` to a relay that
//! streams back encoded audio, drains the body, and decodes it. One call per
//! attempt; retries are layered on top by [`RetryPolicy`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::audio::{decode_audio_blocking, AudioBuffer};
use crate::config::TTSConfig;
use crate::error::SynthesisError;

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Body of a synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_type: String,
    pub speed_ratio: f32,
}

/// Remote text-to-speech: one request in, one decoded buffer out.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, SynthesisError>;
}

/// Streaming HTTP client for the TTS relay endpoint.
pub struct HttpSynthesizer {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpSynthesizer {
    pub fn new(config: &TTSConfig) -> Result<Self, SynthesisError> {
        Self::with_endpoint(&config.endpoint, config.api_key())
    }

    pub fn with_endpoint(endpoint: &str, api_key: Option<String>) -> Result<Self, SynthesisError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SynthesisError::Client(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            api_key,
            client,
        })
    }

    /// POST the request and drain the chunked response body.
    async fn fetch_payload(&self, request: &SynthesisRequest) -> Result<Vec<u8>, SynthesisError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let mut payload = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            payload.extend_from_slice(&chunk?);
        }
        Ok(payload)
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer, SynthesisError> {
        let t0 = Instant::now();
        let payload = self.fetch_payload(request).await?;
        if payload.is_empty() {
            return Err(SynthesisError::EmptyPayload);
        }

        let payload_len = payload.len();
        let audio = decode_audio_blocking(payload).await?;
        debug!(
            "Synthesized {} chars -> {payload_len} bytes, {:.1}s audio in {:.0}ms",
            request.text.chars().count(),
            audio.duration().as_secs_f64(),
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(audio)
    }
}

/// Attempt budget and backoff schedule for one synthesis task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `synthesizer` until it succeeds, fails permanently, or the
    /// attempt budget runs out.
    pub async fn synthesize(
        &self,
        synthesizer: &dyn Synthesizer,
        request: &SynthesisRequest,
    ) -> Result<AudioBuffer, SynthesisError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match synthesizer.synthesize(request).await {
                Ok(audio) => return Ok(audio),
                Err(e) if attempt < attempts && e.is_retryable() => {
                    let delay = self.backoff(attempt);
                    warn!("Synthesis attempt {attempt}/{attempts} failed: {e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
