use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ConfigError, ServerConfig, defaults};

/// Merge YAML overrides on top of environment values and defaults.
///
/// Every missing required key is collected so one error lists them all.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let hume = yaml.hume.unwrap_or_default();
    let whatsapp = yaml.whatsapp.unwrap_or_default();
    let bridge = yaml.bridge.unwrap_or_default();
    let webrtc = yaml.webrtc.unwrap_or_default();

    let mut missing = Vec::new();
    let mut required = |key: &'static str, value: Option<String>| -> String {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => v,
            None => {
                missing.push(key);
                String::new()
            }
        }
    };

    let hume_api_key = required("HUME_API_KEY", hume.api_key.or(env.hume_api_key));
    let hume_config_id = required("HUME_CONFIG_ID", hume.config_id.or(env.hume_config_id));
    let whatsapp_token = required("WHATSAPP_TOKEN", whatsapp.token.or(env.whatsapp_token));
    let whatsapp_webhook_verification_token = required(
        "WHATSAPP_WEBHOOK_VERIFICATION_TOKEN",
        whatsapp
            .webhook_verification_token
            .or(env.whatsapp_webhook_verification_token),
    );
    let whatsapp_phone_number_id = required(
        "WHATSAPP_PHONE_NUMBER_ID",
        whatsapp.phone_number_id.or(env.whatsapp_phone_number_id),
    );

    if !missing.is_empty() {
        return Err(ConfigError::Missing(missing));
    }

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| defaults::HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(defaults::PORT),

        hume_api_key,
        hume_config_id,
        hume_secret_key: hume.secret_key.or(env.hume_secret_key),
        hume_evi_url: hume
            .websocket_url
            .or(env.hume_evi_url)
            .unwrap_or_else(|| defaults::HUME_EVI_URL.to_string()),
        hume_connect_timeout_seconds: hume
            .connect_timeout_seconds
            .or(env.hume_connect_timeout_seconds)
            .unwrap_or(defaults::HUME_CONNECT_TIMEOUT_SECONDS),
        hume_sample_rate: hume
            .sample_rate
            .or(env.hume_sample_rate)
            .unwrap_or(defaults::HUME_SAMPLE_RATE),

        whatsapp_token,
        whatsapp_webhook_verification_token,
        whatsapp_phone_number_id,
        whatsapp_app_secret: whatsapp
            .app_secret
            .or(env.whatsapp_app_secret)
            .filter(|s| !s.is_empty()),
        whatsapp_graph_api_url: whatsapp
            .graph_api_url
            .or(env.whatsapp_graph_api_url)
            .unwrap_or_else(|| defaults::WHATSAPP_GRAPH_API_URL.to_string()),
        whatsapp_api_version: whatsapp
            .api_version
            .or(env.whatsapp_api_version)
            .unwrap_or_else(|| defaults::WHATSAPP_API_VERSION.to_string()),

        output_buffer_capacity: bridge
            .output_buffer_capacity
            .or(env.output_buffer_capacity)
            .unwrap_or(defaults::OUTPUT_BUFFER_CAPACITY),
        outbound_poll_interval_ms: bridge
            .outbound_poll_interval_ms
            .or(env.outbound_poll_interval_ms)
            .unwrap_or(defaults::OUTBOUND_POLL_INTERVAL_MS),
        flush_on_interruption: bridge
            .flush_on_interruption
            .or(env.flush_on_interruption)
            .unwrap_or(defaults::FLUSH_ON_INTERRUPTION),
        shutdown_timeout_seconds: bridge
            .shutdown_timeout_seconds
            .or(env.shutdown_timeout_seconds)
            .unwrap_or(defaults::SHUTDOWN_TIMEOUT_SECONDS),

        webrtc_bind_ip: webrtc
            .bind_ip
            .or(env.webrtc_bind_ip)
            .unwrap_or(defaults::WEBRTC_BIND_IP),
        webrtc_public_ip: webrtc.public_ip.or(env.webrtc_public_ip),
    })
}
