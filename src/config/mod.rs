//! Configuration module for the phone agent server
//!
//! Server configuration comes from .env files, YAML files and environment
//! variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use mello_phone_agent::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::bridge::BridgeConfig;
use crate::core::realtime::HumeEVIConfig;

mod env;
mod merge;
mod validation;
mod yaml;

pub use validation::POLL_INTERVAL_RANGE_MS;
pub use yaml::YamlConfig;

/// Default values applied when neither YAML nor the environment set a key.
pub mod defaults {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 7860;
    pub const HUME_EVI_URL: &str = crate::core::realtime::hume::HUME_EVI_WEBSOCKET_URL;
    pub const HUME_CONNECT_TIMEOUT_SECONDS: u64 = 10;
    pub const HUME_SAMPLE_RATE: u32 = crate::core::realtime::hume::HUME_EVI_DEFAULT_SAMPLE_RATE;
    pub const WHATSAPP_GRAPH_API_URL: &str = crate::whatsapp::DEFAULT_GRAPH_API_URL;
    pub const WHATSAPP_API_VERSION: &str = crate::whatsapp::DEFAULT_API_VERSION;
    pub const OUTPUT_BUFFER_CAPACITY: usize = crate::core::bridge::DEFAULT_OUTPUT_BUFFER_CAPACITY;
    pub const OUTBOUND_POLL_INTERVAL_MS: u64 = 100;
    pub const FLUSH_ON_INTERRUPTION: bool = true;
    pub const SHUTDOWN_TIMEOUT_SECONDS: u64 = 10;
    pub const WEBRTC_BIND_IP: std::net::IpAddr =
        std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED);
}

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),
}

/// Server configuration
///
/// Contains everything needed to run the phone agent:
/// - Server settings (host, port)
/// - Hume EVI credentials and connection settings
/// - WhatsApp Cloud API credentials
/// - Call bridge tunables
/// - WebRTC media addresses
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Hume EVI
    pub hume_api_key: String,
    pub hume_config_id: String,
    pub hume_secret_key: Option<String>,
    pub hume_evi_url: String,
    pub hume_connect_timeout_seconds: u64,
    pub hume_sample_rate: u32,

    // WhatsApp Cloud API
    pub whatsapp_token: String,
    pub whatsapp_webhook_verification_token: String,
    pub whatsapp_phone_number_id: String,
    /// App secret for `X-Hub-Signature-256` verification. Checks are skipped when unset.
    pub whatsapp_app_secret: Option<String>,
    pub whatsapp_graph_api_url: String,
    pub whatsapp_api_version: String,

    // Bridge tunables
    pub output_buffer_capacity: usize,
    pub outbound_poll_interval_ms: u64,
    pub flush_on_interruption: bool,
    pub shutdown_timeout_seconds: u64,

    // WebRTC media
    pub webrtc_bind_ip: IpAddr,
    /// Address advertised to callers when the bind address is not reachable.
    pub webrtc_public_ip: Option<IpAddr>,
}

/// Zeroize every secret when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.hume_api_key.zeroize();
        if let Some(ref mut key) = self.hume_secret_key {
            key.zeroize();
        }
        self.whatsapp_token.zeroize();
        self.whatsapp_webhook_verification_token.zeroize();
        if let Some(ref mut secret) = self.whatsapp_app_secret {
            secret.zeroize();
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("hume_api_key", &"<redacted>")
            .field("hume_config_id", &self.hume_config_id)
            .field(
                "hume_secret_key",
                &self.hume_secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("hume_evi_url", &self.hume_evi_url)
            .field(
                "hume_connect_timeout_seconds",
                &self.hume_connect_timeout_seconds,
            )
            .field("hume_sample_rate", &self.hume_sample_rate)
            .field("whatsapp_token", &"<redacted>")
            .field("whatsapp_webhook_verification_token", &"<redacted>")
            .field("whatsapp_phone_number_id", &self.whatsapp_phone_number_id)
            .field(
                "whatsapp_app_secret",
                &self.whatsapp_app_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("whatsapp_graph_api_url", &self.whatsapp_graph_api_url)
            .field("whatsapp_api_version", &self.whatsapp_api_version)
            .field("output_buffer_capacity", &self.output_buffer_capacity)
            .field("outbound_poll_interval_ms", &self.outbound_poll_interval_ms)
            .field("flush_on_interruption", &self.flush_on_interruption)
            .field("shutdown_timeout_seconds", &self.shutdown_timeout_seconds)
            .field("webrtc_bind_ip", &self.webrtc_bind_ip)
            .field("webrtc_public_ip", &self.webrtc_public_ip)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and defaults.
    ///
    /// The .env file is loaded in main.rs at startup, so its values are
    /// already part of the process environment here.
    ///
    /// # Errors
    /// Returns an error when required keys are missing, a value does not
    /// parse, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed, or
    /// for any of the reasons [`ServerConfig::from_env`] fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Session settings for the Hume EVI client.
    pub fn hume_config(&self) -> HumeEVIConfig {
        let mut config = HumeEVIConfig::new(self.hume_api_key.clone())
            .with_config_id(self.hume_config_id.clone())
            .with_websocket_url(self.hume_evi_url.clone())
            .with_sample_rate(self.hume_sample_rate)
            .with_connection_timeout(self.hume_connect_timeout_seconds);
        if let Some(ref secret) = self.hume_secret_key {
            config = config.with_secret_key(secret.clone());
        }
        config
    }

    /// Tunables shared by every call bridge.
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            output_buffer_capacity: self.output_buffer_capacity,
            outbound_poll_interval: Duration::from_millis(self.outbound_poll_interval_ms),
            flush_on_interruption: self.flush_on_interruption,
            connect_timeout: Duration::from_secs(self.hume_connect_timeout_seconds),
        }
    }

    /// How long shutdown waits for calls to finish.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn has_signature_verification(&self) -> bool {
        self.whatsapp_app_secret.is_some()
    }

    /// Addresses for the per-call media sockets.
    #[cfg(feature = "webrtc")]
    pub fn webrtc_config(&self) -> crate::media::WebRtcConfig {
        crate::media::WebRtcConfig {
            bind_ip: self.webrtc_bind_ip,
            public_ip: self.webrtc_public_ip,
        }
    }

    /// True when the media sockets listen on every interface.
    pub fn webrtc_binds_all_interfaces(&self) -> bool {
        self.webrtc_bind_ip.is_unspecified()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    const ALL_KEYS: &[&str] = &[
        "HOST",
        "PORT",
        "HUME_API_KEY",
        "HUME_CONFIG_ID",
        "HUME_SECRET_KEY",
        "HUME_EVI_URL",
        "HUME_CONNECT_TIMEOUT_SECONDS",
        "HUME_SAMPLE_RATE",
        "WHATSAPP_TOKEN",
        "WHATSAPP_WEBHOOK_VERIFICATION_TOKEN",
        "WHATSAPP_PHONE_NUMBER_ID",
        "WHATSAPP_APP_SECRET",
        "WHATSAPP_GRAPH_API_URL",
        "WHATSAPP_API_VERSION",
        "OUTPUT_BUFFER_CAPACITY",
        "OUTBOUND_POLL_INTERVAL_MS",
        "FLUSH_ON_INTERRUPTION",
        "SHUTDOWN_TIMEOUT_SECONDS",
        "WEBRTC_BIND_IP",
        "WEBRTC_PUBLIC_IP",
    ];

    fn cleanup_env_vars() {
        unsafe {
            for key in ALL_KEYS {
                env::remove_var(key);
            }
        }
    }

    fn set_required_env_vars() {
        unsafe {
            env::set_var("HUME_API_KEY", "hume-key");
            env::set_var("HUME_CONFIG_ID", "cfg-1");
            env::set_var("WHATSAPP_TOKEN", "wa-token");
            env::set_var("WHATSAPP_WEBHOOK_VERIFICATION_TOKEN", "verify-me");
            env::set_var("WHATSAPP_PHONE_NUMBER_ID", "555");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        set_required_env_vars();

        let config = ServerConfig::from_env().unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7860);
        assert_eq!(config.address(), "0.0.0.0:7860");
        assert_eq!(config.hume_evi_url, "wss://api.hume.ai/v0/evi/chat");
        assert_eq!(config.hume_sample_rate, 16000);
        assert_eq!(config.whatsapp_api_version, "v23.0");
        assert_eq!(config.output_buffer_capacity, 256);
        assert_eq!(config.outbound_poll_interval_ms, 100);
        assert!(config.flush_on_interruption);
        assert!(!config.has_signature_verification());
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
        assert!(config.webrtc_binds_all_interfaces());
        assert_eq!(config.webrtc_public_ip, None);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_webrtc_addresses() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("WEBRTC_BIND_IP", "10.0.0.5");
            env::set_var("WEBRTC_PUBLIC_IP", "203.0.113.7");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.webrtc_bind_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(
            config.webrtc_public_ip,
            Some("203.0.113.7".parse::<IpAddr>().unwrap())
        );
        assert!(!config.webrtc_binds_all_interfaces());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_webrtc_addresses() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("WEBRTC_PUBLIC_IP", "not-an-ip");
        }
        assert!(matches!(
            ServerConfig::from_env().unwrap_err(),
            ConfigError::Invalid {
                key: "WEBRTC_PUBLIC_IP",
                ..
            }
        ));

        unsafe {
            env::set_var("WEBRTC_PUBLIC_IP", "0.0.0.0");
        }
        assert!(matches!(
            ServerConfig::from_env().unwrap_err(),
            ConfigError::Invalid {
                key: "WEBRTC_PUBLIC_IP",
                ..
            }
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_reports_all_missing_keys() {
        cleanup_env_vars();

        let err = ServerConfig::from_env().unwrap_err();
        match err {
            ConfigError::Missing(keys) => {
                assert_eq!(
                    keys,
                    vec![
                        "HUME_API_KEY",
                        "HUME_CONFIG_ID",
                        "WHATSAPP_TOKEN",
                        "WHATSAPP_WEBHOOK_VERIFICATION_TOKEN",
                        "WHATSAPP_PHONE_NUMBER_ID",
                    ]
                );
            }
            other => panic!("Expected Missing, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_from_env_empty_value_counts_as_missing() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("HUME_CONFIG_ID", "   ");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("HUME_CONFIG_ID"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_port() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("PORT", "not-a-port");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_poll_interval_out_of_range() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("OUTBOUND_POLL_INTERVAL_MS", "500");
        }

        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "OUTBOUND_POLL_INTERVAL_MS",
                ..
            }
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_zero_buffer_capacity() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("OUTPUT_BUFFER_CAPACITY", "0");
        }

        assert!(ServerConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_bridge_overrides() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("OUTPUT_BUFFER_CAPACITY", "64");
            env::set_var("OUTBOUND_POLL_INTERVAL_MS", "50");
            env::set_var("FLUSH_ON_INTERRUPTION", "false");
            env::set_var("HUME_CONNECT_TIMEOUT_SECONDS", "3");
            env::set_var("WHATSAPP_APP_SECRET", "app-secret");
        }

        let config = ServerConfig::from_env().unwrap();
        let bridge = config.bridge_config();

        assert_eq!(bridge.output_buffer_capacity, 64);
        assert_eq!(bridge.outbound_poll_interval, Duration::from_millis(50));
        assert!(!bridge.flush_on_interruption);
        assert_eq!(bridge.connect_timeout, Duration::from_secs(3));
        assert!(config.has_signature_verification());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_hume_config_carries_credentials() {
        cleanup_env_vars();
        set_required_env_vars();
        unsafe {
            env::set_var("HUME_SECRET_KEY", "hume-secret");
            env::set_var("HUME_EVI_URL", "ws://127.0.0.1:9000/evi");
        }

        let config = ServerConfig::from_env().unwrap();
        let hume = config.hume_config();

        assert_eq!(hume.api_key, "hume-key");
        assert_eq!(hume.config_id.as_deref(), Some("cfg-1"));
        assert_eq!(hume.secret_key.as_deref(), Some("hume-secret"));
        assert_eq!(hume.websocket_url, "ws://127.0.0.1:9000/evi");
        assert!(hume.validate().is_ok());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_debug_redacts_secrets() {
        cleanup_env_vars();
        set_required_env_vars();

        let config = ServerConfig::from_env().unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("hume-key"));
        assert!(!debug.contains("wa-token"));
        assert!(!debug.contains("verify-me"));
        assert!(debug.contains("cfg-1"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        set_required_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

hume:
  config_id: "yaml-cfg"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "10.0.0.1");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.hume_config_id, "yaml-cfg");
        assert_eq!(config.port, 8080);
        // ENV still supplies the rest
        assert_eq!(config.hume_api_key, "hume-key");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file(&config_path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }
}
