//! Mock providers shared by integration tests.
//!
//! - `hume_mock`: local Hume EVI WebSocket server
//! - test configuration helpers

// Not every test binary uses every helper.
#![allow(dead_code)]

pub mod hume_mock;

use mello_phone_agent::ServerConfig;

pub use hume_mock::{HumeBehavior, HumeMockServer};

/// Configuration with dummy credentials pointing at local mocks.
pub fn test_config(hume_url: &str, graph_url: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        hume_api_key: "test-hume-key".to_string(),
        hume_config_id: "test-config".to_string(),
        hume_secret_key: None,
        hume_evi_url: hume_url.to_string(),
        hume_connect_timeout_seconds: 2,
        hume_sample_rate: 16_000,
        whatsapp_token: "test-wa-token".to_string(),
        whatsapp_webhook_verification_token: "verify-me".to_string(),
        whatsapp_phone_number_id: "123".to_string(),
        whatsapp_app_secret: None,
        whatsapp_graph_api_url: graph_url.to_string(),
        whatsapp_api_version: "v23.0".to_string(),
        output_buffer_capacity: 256,
        outbound_poll_interval_ms: 50,
        flush_on_interruption: true,
        shutdown_timeout_seconds: 5,
        webrtc_bind_ip: "127.0.0.1".parse().unwrap(),
        webrtc_public_ip: None,
    }
}

/// Webhook body carrying a single call event.
pub fn call_webhook(call_id: &str, event: &str, sdp: Option<&str>) -> serde_json::Value {
    let mut call = serde_json::json!({
        "id": call_id,
        "from": "15550001111",
        "to": "15550002222",
        "event": event,
        "direction": "USER_INITIATED",
        "timestamp": "1700000000"
    });
    if let Some(sdp) = sdp {
        call["session"] = serde_json::json!({ "sdp_type": "offer", "sdp": sdp });
    }

    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba-1",
            "changes": [{
                "field": "calls",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": { "phone_number_id": "123" },
                    "calls": [call]
                }
            }]
        }]
    })
}
