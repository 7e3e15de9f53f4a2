//! Hume EVI configuration types.
//!
//! # Example
//!
//! ```rust,ignore
//! use mello_phone_agent::core::realtime::hume::{HumeEVIConfig, EVIVersion};
//!
//! let config = HumeEVIConfig::new("your-api-key")
//!     .with_config_id("your-config-id")
//!     .with_version(EVIVersion::V3);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::messages::{
    AudioEncoding, HUME_EVI_DEFAULT_CHANNELS, HUME_EVI_DEFAULT_SAMPLE_RATE,
    HUME_EVI_WEBSOCKET_URL,
};
use crate::core::audio::AudioFormat;
use crate::core::realtime::base::{RealtimeError, RealtimeResult};

// =============================================================================
// EVI Version
// =============================================================================

/// EVI version to use for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EVIVersion {
    /// EVI version 3 (English).
    #[default]
    #[serde(rename = "3")]
    V3,
    /// EVI version 4-mini (multilingual, lower latency).
    #[serde(rename = "4-mini")]
    V4Mini,
}

impl EVIVersion {
    /// Get the version string for API requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            EVIVersion::V3 => "3",
            EVIVersion::V4Mini => "4-mini",
        }
    }
}

impl fmt::Display for EVIVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EVIVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "3" => Ok(EVIVersion::V3),
            "4-mini" => Ok(EVIVersion::V4Mini),
            other => Err(format!("unsupported EVI version '{other}'")),
        }
    }
}

// =============================================================================
// Hume EVI Configuration
// =============================================================================

/// Configuration for one Hume EVI session.
///
/// The `config_id` selects the prompt, language model and voice configured
/// in the Hume dashboard; the bridge treats it as opaque.
#[derive(Clone, Serialize, Deserialize)]
pub struct HumeEVIConfig {
    /// API key for Hume AI.
    pub api_key: String,

    /// Secret key paired with the API key. Carried for token-based auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// EVI configuration ID (created in Hume dashboard).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,

    #[serde(default)]
    pub evi_version: EVIVersion,

    /// Enable verbose transcription for interim user messages.
    #[serde(default)]
    pub verbose_transcription: bool,

    #[serde(default)]
    pub input_encoding: AudioEncoding,

    /// Sample rate in Hz of audio sent and received.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// WebSocket URL (defaults to Hume's production endpoint).
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,

    /// Handshake timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

fn default_sample_rate() -> u32 {
    HUME_EVI_DEFAULT_SAMPLE_RATE
}

fn default_channels() -> u16 {
    HUME_EVI_DEFAULT_CHANNELS
}

fn default_websocket_url() -> String {
    HUME_EVI_WEBSOCKET_URL.to_string()
}

fn default_connection_timeout() -> u64 {
    10
}

impl Default for HumeEVIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: None,
            config_id: None,
            evi_version: EVIVersion::default(),
            verbose_transcription: false,
            input_encoding: AudioEncoding::default(),
            sample_rate: HUME_EVI_DEFAULT_SAMPLE_RATE,
            channels: HUME_EVI_DEFAULT_CHANNELS,
            websocket_url: HUME_EVI_WEBSOCKET_URL.to_string(),
            connection_timeout_seconds: default_connection_timeout(),
        }
    }
}

impl fmt::Debug for HumeEVIConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HumeEVIConfig")
            .field("api_key", &"<redacted>")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("config_id", &self.config_id)
            .field("evi_version", &self.evi_version)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("websocket_url", &self.websocket_url)
            .field("connection_timeout_seconds", &self.connection_timeout_seconds)
            .finish()
    }
}

impl HumeEVIConfig {
    /// Create a new configuration with an API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Set the EVI configuration ID.
    pub fn with_config_id(mut self, config_id: impl Into<String>) -> Self {
        self.config_id = Some(config_id.into());
        self
    }

    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Set the EVI version.
    pub fn with_version(mut self, version: EVIVersion) -> Self {
        self.evi_version = version;
        self
    }

    /// Enable verbose transcription.
    pub fn with_verbose_transcription(mut self) -> Self {
        self.verbose_transcription = true;
        self
    }

    /// Set the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Point the client at a different endpoint (self-hosted proxy, tests).
    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_url = url.into();
        self
    }

    pub fn with_connection_timeout(mut self, seconds: u64) -> Self {
        self.connection_timeout_seconds = seconds;
        self
    }

    /// PCM layout of audio exchanged with EVI.
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    /// Build the WebSocket URL with query parameters.
    pub fn build_websocket_url(&self) -> String {
        fn encode(s: &str) -> String {
            url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
        }

        let mut params = vec![format!("api_key={}", encode(&self.api_key))];

        if let Some(ref config_id) = self.config_id {
            params.push(format!("config_id={}", encode(config_id)));
        }

        if self.verbose_transcription {
            params.push("verbose_transcription=true".to_string());
        }

        params.push(format!("evi_version={}", self.evi_version.as_str()));

        format!("{}?{}", self.websocket_url, params.join("&"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RealtimeResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::MissingCredential(
                "Hume API key is required".to_string(),
            ));
        }

        if self.config_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            return Err(RealtimeError::MissingCredential(
                "Hume config ID is required".to_string(),
            ));
        }

        if self.sample_rate == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        if self.channels == 0 {
            return Err(RealtimeError::InvalidConfiguration(
                "Channels must be greater than 0".to_string(),
            ));
        }

        if self.input_encoding != AudioEncoding::Linear16 {
            return Err(RealtimeError::InvalidConfiguration(
                "Only linear16 input is supported on phone calls".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
