//! WhatsApp webhook handlers.
//!
//! `GET /webhook` answers the subscription handshake. `POST /webhook`
//! receives call notifications: `connect` starts a bridged call in the
//! background, `terminate` hangs one up.

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::errors::AppResult;
use crate::state::AppState;
use crate::whatsapp::{CallEvent, CallEventKind, VerifyParams, WebhookRequest, verify_subscription};

/// Subscription verification handshake. Echoes `hub.challenge` on success.
pub async fn verify_webhook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> AppResult<String> {
    let challenge = verify_subscription(&params, &state.config.whatsapp_webhook_verification_token)?;
    info!("Webhook subscription verified");
    Ok(challenge)
}

/// Receive webhook events.
///
/// Returns as soon as the events are dispatched; call setup runs in
/// background tasks tracked by the call registry.
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let request = WebhookRequest::parse(&body)?;
    let events = request.call_events()?;

    debug!(entries = request.entry.len(), calls = events.len(), "Webhook received");

    for event in events {
        dispatch_call_event(&state, event);
    }

    Ok(Json(json!({ "status": "success" })))
}

fn dispatch_call_event(state: &Arc<AppState>, event: CallEvent) {
    match event.event {
        CallEventKind::Connect => {
            let call_id = event.id.clone();
            let setup = handle_call_connect(state.clone(), event);
            if !state.registry.spawn_setup(setup) {
                warn!(call_id = %call_id, "Shutting down, ignoring incoming call");
            }
        }
        CallEventKind::Terminate => {
            info!(call_id = %event.id, status = ?event.status, "Caller ended call");
            state.whatsapp.forget(&event.id);
            if !state.registry.hangup(&event.id) {
                debug!(call_id = %event.id, "Terminate for unknown call");
            }
        }
        CallEventKind::Other => {
            debug!(call_id = %event.id, status = ?event.status, "Ignoring call event");
        }
    }
}

/// Answer the offer, accept the call on WhatsApp and start the bridge.
///
/// Any failure closes the media connection and terminates the WhatsApp
/// call; nothing stays registered.
pub async fn handle_call_connect(state: Arc<AppState>, event: CallEvent) {
    let call_id = event.id;

    let Some(offer) = event.session.filter(|s| !s.sdp.trim().is_empty()) else {
        warn!(call_id = %call_id, "Connect event without SDP offer");
        terminate_call(&state, &call_id).await;
        return;
    };

    info!(call_id = %call_id, from = ?event.from, "Incoming call");

    let media = match state.media.connect(&call_id, &offer.sdp).await {
        Ok(media) => media,
        Err(e) => {
            error!(call_id = %call_id, "Failed to create media connection: {e}");
            terminate_call(&state, &call_id).await;
            return;
        }
    };

    let accepted = match state.whatsapp.pre_accept(&call_id, &media.sdp_answer).await {
        Ok(()) => state.whatsapp.accept(&call_id, &media.sdp_answer).await,
        Err(e) => Err(e),
    };

    if let Err(e) = accepted {
        error!(call_id = %call_id, "Failed to accept call: {e}");
        if let Err(e) = media.connection.close().await {
            warn!(call_id = %call_id, "Error closing media connection: {e}");
        }
        terminate_call(&state, &call_id).await;
        return;
    }

    if let Err(e) = state
        .registry
        .start_call(&call_id, media.connection)
        .await
    {
        error!(call_id = %call_id, "Failed to start call: {e}");
        terminate_call(&state, &call_id).await;
    }
}

async fn terminate_call(state: &AppState, call_id: &str) {
    if let Err(e) = state.whatsapp.terminate(call_id).await {
        warn!(call_id = %call_id, "Failed to terminate WhatsApp call: {e}");
        state.whatsapp.forget(call_id);
    }
}
