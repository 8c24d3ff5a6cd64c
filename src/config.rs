//! Configuration management for realtime-tts-rs.
//!
//! Loads config from YAML files in standard locations. Every section falls
//! back to defaults, so an empty or missing file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::reply_speaker::client::RetryPolicy;

/// Lowest and highest speed ratio the TTS provider accepts.
pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Clamp a requested speed ratio into the supported range.
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// POST to a relay that streams back encoded audio bytes.
    Http,
    /// Speak the upstream provider's WebSocket frame protocol directly.
    Websocket,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TTSConfig {
    pub enabled: bool,
    pub transport: TransportKind,
    pub endpoint: String,
    pub upstream_url: String,
    pub api_key_env: String,
    pub voice: Option<String>,
    pub speed: f32,
    pub encoding: String,
    pub timeout_secs: u64,
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transport: TransportKind::Http,
            endpoint: "http://127.0.0.1:3000/api/voice/tts-ws-proxy".into(),
            upstream_url: "wss://openai.qiniu.com/v1/voice/tts".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            voice: None,
            speed: 1.0,
            encoding: "mp3".into(),
            timeout_secs: 30,
            max_in_flight: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl TTSConfig {
    /// Bounded wait applied to each synthesis task.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    /// Bearer token read from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    pub catalog_path: Option<PathBuf>,
    pub catalog_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tts: TTSConfig,
    pub voices: VoicesConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/realtime-tts/config.yaml
    /// 3. /etc/realtime-tts/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/realtime-tts/config.yaml")),
                Some(PathBuf::from("/etc/realtime-tts/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    /// Parse a YAML document, normalising out-of-range values.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        let mut config: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(contents)?
        };
        config.tts.speed = clamp_speed(config.tts.speed);
        config.tts.voice = config.tts.voice.filter(|v| !v.trim().is_empty());
        Ok(config)
    }
}
