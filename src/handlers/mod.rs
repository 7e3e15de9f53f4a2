//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `webhook` - WhatsApp webhook verification and call events

pub mod api;
pub mod webhook;

pub use api::health_check;
pub use webhook::{handle_webhook, verify_webhook};
