//! Error types for the reply speech pipeline.
//!
//! None of these are fatal to the surrounding chat: synthesis failures drop
//! one segment's audio, playback failures skip one buffer.

use std::time::Duration;

/// Failure to turn one text segment into decoded audio.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// HTTP transport failure (connect, timeout, body read).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The TTS endpoint answered with a non-success status.
    #[error("TTS endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response stream finished without a single audio byte.
    #[error("TTS endpoint returned an empty audio stream")]
    EmptyPayload,

    /// The payload could not be decoded as audio.
    #[error("failed to decode audio: {0}")]
    Decode(String),

    /// WebSocket protocol or framing failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The task did not finish within its bounded wait.
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// The client itself could not be built.
    #[error("client setup failed: {0}")]
    Client(String),
}

impl SynthesisError {
    /// Whether another attempt has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Transport(_) | Self::EmptyPayload | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Client(_) => false,
        }
    }
}

/// Failure of the audio output device.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// No usable output device; the engine stays idle.
    #[error("audio output unavailable: {0}")]
    DeviceUnavailable(String),

    /// A single buffer could not be played.
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Failure to reach the speech controller task.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("speech controller has shut down")]
    Closed,
}

/// Failure to load the voice catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read voice catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid voice catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("voice catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("voice catalog endpoint returned status {0}")]
    Status(u16),
}
