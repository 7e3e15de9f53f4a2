use std::env;
use std::net::IpAddr;
use std::str::FromStr;

use super::ConfigError;

/// Values read from the process environment. Empty variables count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,

    pub hume_api_key: Option<String>,
    pub hume_config_id: Option<String>,
    pub hume_secret_key: Option<String>,
    pub hume_evi_url: Option<String>,
    pub hume_connect_timeout_seconds: Option<u64>,
    pub hume_sample_rate: Option<u32>,

    pub whatsapp_token: Option<String>,
    pub whatsapp_webhook_verification_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub whatsapp_app_secret: Option<String>,
    pub whatsapp_graph_api_url: Option<String>,
    pub whatsapp_api_version: Option<String>,

    pub output_buffer_capacity: Option<usize>,
    pub outbound_poll_interval_ms: Option<u64>,
    pub flush_on_interruption: Option<bool>,
    pub shutdown_timeout_seconds: Option<u64>,

    pub webrtc_bind_ip: Option<IpAddr>,
    pub webrtc_public_ip: Option<IpAddr>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host: string("HOST"),
            port: parsed("PORT")?,

            hume_api_key: string("HUME_API_KEY"),
            hume_config_id: string("HUME_CONFIG_ID"),
            hume_secret_key: string("HUME_SECRET_KEY"),
            hume_evi_url: string("HUME_EVI_URL"),
            hume_connect_timeout_seconds: parsed("HUME_CONNECT_TIMEOUT_SECONDS")?,
            hume_sample_rate: parsed("HUME_SAMPLE_RATE")?,

            whatsapp_token: string("WHATSAPP_TOKEN"),
            whatsapp_webhook_verification_token: string("WHATSAPP_WEBHOOK_VERIFICATION_TOKEN"),
            whatsapp_phone_number_id: string("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_app_secret: string("WHATSAPP_APP_SECRET"),
            whatsapp_graph_api_url: string("WHATSAPP_GRAPH_API_URL"),
            whatsapp_api_version: string("WHATSAPP_API_VERSION"),

            output_buffer_capacity: parsed("OUTPUT_BUFFER_CAPACITY")?,
            outbound_poll_interval_ms: parsed("OUTBOUND_POLL_INTERVAL_MS")?,
            flush_on_interruption: boolean("FLUSH_ON_INTERRUPTION")?,
            shutdown_timeout_seconds: parsed("SHUTDOWN_TIMEOUT_SECONDS")?,

            webrtc_bind_ip: parsed("WEBRTC_BIND_IP")?,
            webrtc_public_ip: parsed("WEBRTC_PUBLIC_IP")?,
        })
    }
}

fn string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    string(key)
        .map(|v| {
            v.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                message: format!("'{v}': {e}"),
            })
        })
        .transpose()
}

fn boolean(key: &'static str) -> Result<Option<bool>, ConfigError> {
    string(key)
        .map(|v| match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                message: format!("'{v}' is not a boolean"),
            }),
        })
        .transpose()
}
