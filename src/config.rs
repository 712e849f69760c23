//! # Configuration Management
//!
//! This module handles loading application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between sections)
//! - TTS provider variables (SUPERTONE_*, OUTPUT_DEVICE, HOST, PORT)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML / environment data
//! - **Immutable values**: The loaded `AppConfig` is built once and handed to the
//!   components that need it; nothing reads configuration from globals
//! - **Result<T, E>**: Loading and validation report problems instead of panicking
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Provider variables (SUPERTONE_API_KEY, SUPERTONE_VOICE_ID, ...)
//! 2. Environment variables (APP_SERVER__PORT, APP_PLAYBACK__MAX_HEADER_BYTES, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub voice: VoiceConfig,
    pub playback: PlaybackConfig,
}

/// Address the relay server binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection settings for the streaming TTS provider.
///
/// ## Fields:
/// - `base_url`: Provider origin; the stream URL is `{base_url}/v1/text-to-speech/{voice_id}/stream`
/// - `api_key`: Sent as the `x-sup-api-key` header
/// - `voice_id`: Voice to synthesize with
/// - `connect_timeout_secs`: TCP/TLS connect timeout; reads are unbounded because the body is live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: String,
    pub voice_id: String,
    pub connect_timeout_secs: u64,
}

/// Defaults applied to fields a request leaves out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub language: String,
    pub style: String,
    pub model: String,
    pub pitch_variance: f64,
    pub speed: f64,
}

/// Local playback (consumer mode) settings.
///
/// ## Fields:
/// - `output_device`: Device index or exact name; `None` uses the default output
/// - `max_header_bytes`: Bytes to buffer while looking for the WAV header
/// - `header_dump_path`: Where buffered bytes are written when no header is found
/// - `max_queued_buffers`: Sample buffers allowed to wait in the output queue before writes block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub output_device: Option<String>,
    pub max_header_bytes: usize,
    pub header_dump_path: String,
    pub max_queued_buffers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            upstream: UpstreamConfig {
                base_url: "https://supertoneapi.com".to_string(),
                api_key: String::new(),
                voice_id: String::new(),
                connect_timeout_secs: 10,
            },
            voice: VoiceConfig {
                language: "ko".to_string(),
                style: "happy".to_string(),
                model: "sona_speech_1".to_string(),
                pitch_variance: 1.0,
                speed: 1.0,
            },
            playback: PlaybackConfig {
                output_device: None,
                max_header_bytes: crate::wav::header::DEFAULT_MAX_HEADER_BYTES,
                header_dump_path: "./wav_header_dump.bin".to_string(),
                max_queued_buffers: 8,
            },
        }
    }
}

/// Provider variables and the config keys they override.
const PROVIDER_OVERRIDES: &[(&str, &str)] = &[
    ("SUPERTONE_API_KEY", "upstream.api_key"),
    ("SUPERTONE_VOICE_ID", "upstream.voice_id"),
    ("SUPERTONE_BASE_URL", "upstream.base_url"),
    ("SUPERTONE_LANGUAGE", "voice.language"),
    ("SUPERTONE_STYLE", "voice.style"),
    ("SUPERTONE_MODEL", "voice.model"),
    ("SUPERTONE_PITCH_VARIANCE", "voice.pitch_variance"),
    ("SUPERTONE_SPEED", "voice.speed"),
    ("OUTPUT_DEVICE", "playback.output_device"),
    ("HOST", "server.host"),
    ("PORT", "server.port"),
];

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_PLAYBACK__MAX_HEADER_BYTES=65536`: Shrink the header bound
    /// - `SUPERTONE_API_KEY=...`: Provider credential
    /// - `OUTPUT_DEVICE=7` or `OUTPUT_DEVICE="MacBook Pro Speakers"`: Output selector
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in PROVIDER_OVERRIDES {
            if let Ok(value) = env::var(var) {
                let value = value.trim().to_string();
                if !value.is_empty() {
                    settings = settings.set_override(*key, value)?;
                }
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upstream.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Upstream base URL cannot be empty"));
        }

        if self.playback.max_header_bytes < crate::wav::scanner::RIFF_HEADER_LEN {
            return Err(anyhow::anyhow!(
                "Max header bytes must be at least {}",
                crate::wav::scanner::RIFF_HEADER_LEN
            ));
        }

        if self.playback.max_queued_buffers == 0 {
            return Err(anyhow::anyhow!("Max queued buffers must be greater than 0"));
        }

        Ok(())
    }

    /// Check the provider credentials needed by modes that call upstream.
    pub fn require_credentials(&self) -> Result<()> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("SUPERTONE_API_KEY is not set"));
        }
        if self.upstream.voice_id.trim().is_empty() {
            return Err(anyhow::anyhow!("SUPERTONE_VOICE_ID is not set"));
        }
        Ok(())
    }

    /// Full URL of the provider's streaming endpoint.
    pub fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream",
            self.upstream.base_url.trim_end_matches('/'),
            self.upstream.voice_id
        )
    }
}
