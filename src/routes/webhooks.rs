//! WhatsApp webhook route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::webhook;
use crate::state::AppState;
use std::sync::Arc;

/// Create the webhook router
///
/// # Endpoints
///
/// - `GET /webhook` - subscription verification (`hub.mode`, `hub.verify_token`,
///   `hub.challenge`)
/// - `POST /webhook` - call events from the WhatsApp Business account
///
/// Signature verification is applied by the caller once state is available.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/webhook",
            get(webhook::verify_webhook).post(webhook::handle_webhook),
        )
        .layer(TraceLayer::new_for_http())
}
