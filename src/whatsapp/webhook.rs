//! WhatsApp Business webhook payloads.
//!
//! Only the `calls` field is modelled in detail. Every other change field
//! (messages, statuses, ...) is kept as raw JSON and ignored by the caller.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::{WHATSAPP_BUSINESS_ACCOUNT, WhatsAppError, WhatsAppResult};

/// Top-level webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRequest {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    /// WhatsApp Business Account ID.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// `value` of a `calls` change.
#[derive(Debug, Clone, Deserialize)]
pub struct CallsValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub calls: Vec<CallEvent>,
}

/// One call lifecycle notification.
#[derive(Debug, Clone, Deserialize)]
pub struct CallEvent {
    /// WhatsApp call id (`wacid.…`).
    pub id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub event: CallEventKind,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub session: Option<SdpSession>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    Connect,
    Terminate,
    #[serde(other)]
    Other,
}

/// SDP offer (in webhooks) or answer (in call actions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpSession {
    pub sdp_type: String,
    pub sdp: String,
}

impl SdpSession {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

impl WebhookRequest {
    /// Parse a raw webhook body, rejecting non-WhatsApp objects.
    pub fn parse(body: &[u8]) -> WhatsAppResult<Self> {
        let request: WebhookRequest = serde_json::from_slice(body)
            .map_err(|e| WhatsAppError::InvalidPayload(e.to_string()))?;

        if request.object != WHATSAPP_BUSINESS_ACCOUNT {
            return Err(WhatsAppError::InvalidPayload(format!(
                "unexpected object type '{}'",
                request.object
            )));
        }

        Ok(request)
    }

    /// Every call event in the body, in delivery order.
    pub fn call_events(&self) -> WhatsAppResult<Vec<CallEvent>> {
        let mut events = Vec::new();

        for entry in &self.entry {
            for change in &entry.changes {
                if change.field != "calls" {
                    debug!(field = %change.field, "Ignoring webhook change");
                    continue;
                }
                let value: CallsValue = serde_json::from_value(change.value.clone())
                    .map_err(|e| WhatsAppError::InvalidPayload(e.to_string()))?;
                events.extend(value.calls);
            }
        }

        Ok(events)
    }
}

/// Query parameters of the subscription handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Check a subscription request and return the challenge to echo back.
pub fn verify_subscription(params: &VerifyParams, expected_token: &str) -> WhatsAppResult<String> {
    if params.mode.as_deref() != Some("subscribe") {
        return Err(WhatsAppError::VerificationFailed(
            "hub.mode must be 'subscribe'".to_string(),
        ));
    }

    let token = params.verify_token.as_deref().unwrap_or_default();
    let matches: bool = token.as_bytes().ct_eq(expected_token.as_bytes()).into();
    if expected_token.is_empty() || !matches {
        return Err(WhatsAppError::VerificationFailed(
            "verify token mismatch".to_string(),
        ));
    }

    params
        .challenge
        .clone()
        .ok_or_else(|| WhatsAppError::VerificationFailed("missing hub.challenge".to_string()))
}
