//! Client for the streaming text-to-speech provider.
//!
//! Builds the provider payload from a request plus configured defaults and opens
//! the streaming response. Status handling is left to the caller: the relay and
//! the local player treat rejections differently.

use crate::config::{AppConfig, VoiceConfig};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Header carrying the provider API key.
pub const API_KEY_HEADER: &str = "x-sup-api-key";

/// A synthesis request before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub language: Option<String>,
    pub style: Option<String>,
    pub model: Option<String>,
    pub pitch_variance: Option<f64>,
    pub speed: Option<f64>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// JSON body sent to the provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UpstreamPayload {
    pub text: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub model: String,
    pub voice_settings: VoiceSettings,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VoiceSettings {
    pub pitch_variance: f64,
    pub speed: f64,
}

/// Merge a request with the configured voice defaults.
///
/// Empty strings count as missing. `style` is left out entirely when neither
/// the request nor the defaults name one.
pub fn build_payload(request: &SpeechRequest, defaults: &VoiceConfig) -> UpstreamPayload {
    fn pick(value: &Option<String>, default: &str) -> String {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    let style = pick(&request.style, &defaults.style);

    UpstreamPayload {
        text: request.text.clone(),
        language: pick(&request.language, &defaults.language),
        style: if style.is_empty() { None } else { Some(style) },
        model: pick(&request.model, &defaults.model),
        voice_settings: VoiceSettings {
            pitch_variance: request.pitch_variance.unwrap_or(defaults.pitch_variance),
            speed: request.speed.unwrap_or(defaults.speed),
        },
    }
}

/// Shared HTTP client for the provider's streaming endpoint.
///
/// Cheap to clone: `reqwest::Client` is reference counted internally.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    defaults: VoiceConfig,
}

impl UpstreamClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(config.upstream.api_key.trim())
            .context("API key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            http,
            url: config.stream_url(),
            defaults: config.voice.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn payload_for(&self, request: &SpeechRequest) -> UpstreamPayload {
        build_payload(request, &self.defaults)
    }

    /// Send the request and return as soon as the response head arrives.
    ///
    /// The body is left unread so callers can stream it.
    pub async fn open_stream(&self, request: &SpeechRequest) -> reqwest::Result<reqwest::Response> {
        let payload = self.payload_for(request);
        debug!(
            url = %self.url,
            text_len = payload.text.chars().count(),
            language = %payload.language,
            model = %payload.model,
            "Opening upstream TTS stream"
        );
        self.http.post(&self.url).json(&payload).send().await
    }
}
