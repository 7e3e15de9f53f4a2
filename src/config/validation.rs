use super::{ConfigError, ServerConfig};

/// Accepted outbound poll interval range in milliseconds.
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 50..=100;

/// Validate value ranges of a merged configuration.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.port == 0 {
        return Err(invalid("PORT", "must be greater than 0"));
    }

    if config.hume_sample_rate == 0 {
        return Err(invalid("HUME_SAMPLE_RATE", "must be greater than 0"));
    }

    if config.hume_connect_timeout_seconds == 0 {
        return Err(invalid(
            "HUME_CONNECT_TIMEOUT_SECONDS",
            "must be greater than 0",
        ));
    }

    if !config.hume_evi_url.starts_with("ws://") && !config.hume_evi_url.starts_with("wss://") {
        return Err(invalid("HUME_EVI_URL", "must be a ws:// or wss:// URL"));
    }

    if !config.whatsapp_graph_api_url.starts_with("http://")
        && !config.whatsapp_graph_api_url.starts_with("https://")
    {
        return Err(invalid(
            "WHATSAPP_GRAPH_API_URL",
            "must be an http:// or https:// URL",
        ));
    }

    if config.output_buffer_capacity == 0 {
        return Err(invalid("OUTPUT_BUFFER_CAPACITY", "must be greater than 0"));
    }

    if !POLL_INTERVAL_RANGE_MS.contains(&config.outbound_poll_interval_ms) {
        return Err(invalid(
            "OUTBOUND_POLL_INTERVAL_MS",
            &format!(
                "must be between {} and {}",
                POLL_INTERVAL_RANGE_MS.start(),
                POLL_INTERVAL_RANGE_MS.end()
            ),
        ));
    }

    if config.webrtc_public_ip.is_some_and(|ip| ip.is_unspecified()) {
        return Err(invalid(
            "WEBRTC_PUBLIC_IP",
            "must be a routable address, not 0.0.0.0 or ::",
        ));
    }

    Ok(())
}

fn invalid(key: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.to_string(),
    }
}
