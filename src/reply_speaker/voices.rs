//! Voice catalog: the list of `voice_type` ids a user can pick from.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_name: String,
    pub voice_type: String,
    #[serde(default)]
    pub category: String,
    /// Sample clip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updatetime: Option<i64>,
}

/// Catalog documents come either as a bare array or wrapped in `{"data": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    List(Vec<Voice>),
    Envelope { data: Vec<Voice> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<Voice>) -> Self {
        Self { voices }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let voices = match serde_json::from_str(json)? {
            CatalogDocument::List(voices) => voices,
            CatalogDocument::Envelope { data } => data,
        };
        Ok(Self::new(voices))
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub async fn fetch(url: &str, api_key: Option<&str>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let mut request = client.get(url);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        Self::from_json_str(&body)
    }

    /// Catalog named by the configuration: file first, then URL. Failures
    /// are logged and yield an empty catalog, which disables voice validation.
    pub async fn load_configured(config: &Config) -> Self {
        let result = if let Some(path) = &config.voices.catalog_path {
            Self::load(path).map(|c| (c, path.display().to_string()))
        } else if let Some(url) = &config.voices.catalog_url {
            let key = config.tts.api_key();
            Self::fetch(url, key.as_deref()).await.map(|c| (c, url.clone()))
        } else {
            return Self::default();
        };

        match result {
            Ok((catalog, source)) => {
                info!("Loaded {} voices from {source}", catalog.len());
                catalog
            }
            Err(e) => {
                warn!("Voice catalog unavailable: {e}");
                Self::default()
            }
        }
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn find(&self, voice_type: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.voice_type == voice_type)
    }

    pub fn default_voice(&self) -> Option<&Voice> {
        self.voices.first()
    }

    pub fn by_category(&self) -> BTreeMap<&str, Vec<&Voice>> {
        let mut groups: BTreeMap<&str, Vec<&Voice>> = BTreeMap::new();
        for voice in &self.voices {
            groups.entry(voice.category.as_str()).or_default().push(voice);
        }
        groups
    }
}
