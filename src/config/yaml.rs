use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 7860
///
/// hume:
///   api_key: "your-hume-key"
///   config_id: "your-evi-config-id"
///   connect_timeout_seconds: 10
///
/// whatsapp:
///   token: "your-access-token"
///   webhook_verification_token: "your-verify-token"
///   phone_number_id: "1234567890"
///   app_secret: "your-app-secret"
///
/// bridge:
///   output_buffer_capacity: 256
///   outbound_poll_interval_ms: 100
///   flush_on_interruption: true
///   shutdown_timeout_seconds: 10
///
/// webrtc:
///   bind_ip: "0.0.0.0"
///   public_ip: "203.0.113.7"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub hume: Option<HumeYaml>,
    pub whatsapp: Option<WhatsAppYaml>,
    pub bridge: Option<BridgeYaml>,
    pub webrtc: Option<WebRtcYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Hume EVI configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HumeYaml {
    pub api_key: Option<String>,
    /// EVI configuration id; selects prompt, model and voice.
    pub config_id: Option<String>,
    pub secret_key: Option<String>,
    pub websocket_url: Option<String>,
    pub connect_timeout_seconds: Option<u64>,
    pub sample_rate: Option<u32>,
}

/// WhatsApp Cloud API configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WhatsAppYaml {
    pub token: Option<String>,
    pub webhook_verification_token: Option<String>,
    pub phone_number_id: Option<String>,
    /// Enables `X-Hub-Signature-256` checks when set.
    pub app_secret: Option<String>,
    pub graph_api_url: Option<String>,
    pub api_version: Option<String>,
}

/// Call bridge tunables from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeYaml {
    pub output_buffer_capacity: Option<usize>,
    pub outbound_poll_interval_ms: Option<u64>,
    pub flush_on_interruption: Option<bool>,
    pub shutdown_timeout_seconds: Option<u64>,
}

/// WebRTC media addresses from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WebRtcYaml {
    pub bind_ip: Option<IpAddr>,
    pub public_ip: Option<IpAddr>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&contents)
    }

    /// Parse YAML configuration from a string. An empty document is valid.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
