pub mod api;
pub mod webhooks;

use axum::{Router, middleware};
use http::{HeaderValue, header};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::middleware::signature_middleware;
use crate::state::AppState;

/// Build the complete application router.
///
/// Layer order (outer to inner): security headers -> signature check ->
/// handler. The signature check only applies to the webhook routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let webhook_routes = webhooks::create_webhook_router().layer(
        middleware::from_fn_with_state(state.clone(), signature_middleware),
    );

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    api::create_api_router()
        .merge(webhook_routes)
        .with_state(state)
        .layer(security_headers)
}
