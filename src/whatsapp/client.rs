//! WhatsApp Graph API client for call actions.
//!
//! Every action is a `POST {graph}/{version}/{phone_number_id}/calls` with a
//! bearer token. The client remembers which calls it accepted so they can
//! be terminated when the process shuts down.

use dashmap::DashSet;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::webhook::SdpSession;
use super::{WhatsAppError, WhatsAppResult};

/// Default Graph API base URL.
pub const DEFAULT_GRAPH_API_URL: &str = "https://graph.facebook.com";

/// Default Graph API version.
pub const DEFAULT_API_VERSION: &str = "v23.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Call action understood by the Graph API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    PreAccept,
    Accept,
    Terminate,
}

impl fmt::Display for CallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallAction::PreAccept => "pre_accept",
            CallAction::Accept => "accept",
            CallAction::Terminate => "terminate",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Serialize)]
struct CallActionRequest<'a> {
    messaging_product: &'static str,
    call_id: &'a str,
    action: CallAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<SdpSession>,
}

/// Graph API client.
pub struct WhatsAppClient {
    http: reqwest::Client,
    token: Zeroizing<String>,
    phone_number_id: String,
    base_url: String,
    api_version: String,
    active_calls: DashSet<String>,
}

impl fmt::Debug for WhatsAppClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhatsAppClient")
            .field("phone_number_id", &self.phone_number_id)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("active_calls", &self.active_calls.len())
            .finish()
    }
}

impl WhatsAppClient {
    pub fn new(token: impl Into<String>, phone_number_id: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to build configured HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });

        Self {
            http,
            token: Zeroizing::new(token.into()),
            phone_number_id: phone_number_id.into(),
            base_url: DEFAULT_GRAPH_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            active_calls: DashSet::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn calls_url(&self) -> String {
        format!(
            "{}/{}/{}/calls",
            self.base_url.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }

    /// Ask WhatsApp to start media setup with our SDP answer.
    pub async fn pre_accept(&self, call_id: &str, sdp_answer: &str) -> WhatsAppResult<()> {
        self.call_action(call_id, CallAction::PreAccept, Some(sdp_answer))
            .await
    }

    /// Accept the call. From here on it counts as active.
    pub async fn accept(&self, call_id: &str, sdp_answer: &str) -> WhatsAppResult<()> {
        self.call_action(call_id, CallAction::Accept, Some(sdp_answer))
            .await?;
        self.active_calls.insert(call_id.to_string());
        Ok(())
    }

    /// End the call.
    pub async fn terminate(&self, call_id: &str) -> WhatsAppResult<()> {
        self.call_action(call_id, CallAction::Terminate, None).await?;
        self.active_calls.remove(call_id);
        Ok(())
    }

    /// Forget a call that WhatsApp already reported as ended.
    pub fn forget(&self, call_id: &str) -> bool {
        self.active_calls.remove(call_id).is_some()
    }

    /// Terminate every accepted call. Returns how many were terminated.
    pub async fn terminate_all_calls(&self) -> usize {
        let call_ids: Vec<String> = self.active_calls.iter().map(|id| id.key().clone()).collect();
        if call_ids.is_empty() {
            return 0;
        }

        info!(count = call_ids.len(), "Terminating all WhatsApp calls");
        let mut terminated = 0;
        for call_id in call_ids {
            match self.terminate(&call_id).await {
                Ok(()) => terminated += 1,
                Err(e) => warn!(call_id = %call_id, "Failed to terminate call: {e}"),
            }
        }
        terminated
    }

    pub fn active_calls(&self) -> Vec<String> {
        self.active_calls.iter().map(|id| id.key().clone()).collect()
    }

    async fn call_action(
        &self,
        call_id: &str,
        action: CallAction,
        sdp_answer: Option<&str>,
    ) -> WhatsAppResult<()> {
        let body = CallActionRequest {
            messaging_product: "whatsapp",
            call_id,
            action,
            session: sdp_answer.map(SdpSession::answer),
        };

        debug!(call_id = %call_id, %action, "Sending WhatsApp call action");

        let response = self
            .http
            .post(self.calls_url())
            .bearer_auth(self.token.as_str())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(call_id = %call_id, %action, status, "WhatsApp call action rejected");
            return Err(WhatsAppError::Api { status, body });
        }

        debug!(call_id = %call_id, %action, "WhatsApp call action succeeded");
        Ok(())
    }
}
