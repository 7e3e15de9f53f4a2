use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook body signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign_payload(secret: &[u8], body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(format!("Invalid app secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check an `X-Hub-Signature-256` header value against the raw body.
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> Result<(), AppError> {
    let provided = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or_else(|| AppError::Unauthorized("Malformed signature header".to_string()))?;

    let expected = sign_payload(secret, body)?;
    let matches: bool = expected
        .as_bytes()
        .ct_eq(provided.to_ascii_lowercase().as_bytes())
        .into();

    if matches {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Signature mismatch".to_string()))
    }
}

/// Verify WhatsApp webhook signatures on POST requests.
///
/// Passes every request through when no app secret is configured. The body
/// is buffered to compute the HMAC and handed on unchanged.
pub async fn signature_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ref secret) = state.config.whatsapp_app_secret else {
        return Ok(next.run(request).await);
    };

    if request.method() != Method::POST {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("Missing signature header".to_string()))?;

    let (parts, body) = request.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read request body: {e}")))?
        .to_bytes();

    verify_signature(secret.as_bytes(), &body_bytes, &header)?;
    tracing::debug!("Webhook signature verified");

    let request = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(request).await)
}
