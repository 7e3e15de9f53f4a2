//! WhatsApp Cloud API integration.
//!
//! - [`webhook`]: webhook payload types and subscription verification
//! - [`client`]: Graph API client for call actions (pre_accept, accept,
//!   terminate)

pub mod client;
pub mod webhook;

use thiserror::Error;

pub use client::{CallAction, DEFAULT_API_VERSION, DEFAULT_GRAPH_API_URL, WhatsAppClient};
pub use webhook::{
    CallEvent, CallEventKind, CallsValue, SdpSession, VerifyParams, WebhookChange, WebhookEntry,
    WebhookRequest, verify_subscription,
};

/// `object` value of every WhatsApp Business webhook.
pub const WHATSAPP_BUSINESS_ACCOUNT: &str = "whatsapp_business_account";

/// Errors from the WhatsApp integration.
#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The Graph API answered with a non-success status.
    #[error("WhatsApp API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Webhook verification failed: {0}")]
    VerificationFailed(String),
}

pub type WhatsAppResult<T> = Result<T, WhatsAppError>;
