use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::core::bridge::{CallOutcome, CancelReason};
use crate::core::realtime::{HumeSessionFactory, SpeechSessionFactory};
use crate::core::registry::{CallRegistry, CompletionCallback, CompletionFuture};
use crate::media::MediaConnector;
use crate::whatsapp::WhatsAppClient;

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    /// Active calls. Owned here so nothing about calls lives in globals.
    pub registry: Arc<CallRegistry>,
    pub whatsapp: Arc<WhatsAppClient>,
    /// Answers SDP offers with a media connection.
    pub media: Arc<dyn MediaConnector>,
}

impl AppState {
    /// Build the production state: Hume EVI sessions and the media engine
    /// compiled into this build.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let factory: Arc<dyn SpeechSessionFactory> =
            Arc::new(HumeSessionFactory::new(config.hume_config()));
        let whatsapp = Arc::new(
            WhatsAppClient::new(
                config.whatsapp_token.clone(),
                config.whatsapp_phone_number_id.clone(),
            )
            .with_base_url(config.whatsapp_graph_api_url.clone())
            .with_api_version(config.whatsapp_api_version.clone()),
        );

        let media = media_connector(&config);
        Self::with_components(config, factory, media, whatsapp)
    }

    /// Build the state from explicit components.
    pub fn with_components(
        config: ServerConfig,
        factory: Arc<dyn SpeechSessionFactory>,
        media: Arc<dyn MediaConnector>,
        whatsapp: Arc<WhatsAppClient>,
    ) -> Arc<Self> {
        let registry = Arc::new(
            CallRegistry::new(factory, config.bridge_config())
                .with_completion_callback(terminate_on_completion(whatsapp.clone())),
        );

        Arc::new(Self {
            config,
            registry,
            whatsapp,
            media,
        })
    }
}

/// WebRTC engine answering WhatsApp offers.
#[cfg(feature = "webrtc")]
fn media_connector(config: &ServerConfig) -> Arc<dyn MediaConnector> {
    Arc::new(crate::media::WebRtcMediaConnector::new(config.webrtc_config()))
}

/// Without the `webrtc` feature no engine is linked and every call is declined.
#[cfg(not(feature = "webrtc"))]
fn media_connector(_config: &ServerConfig) -> Arc<dyn MediaConnector> {
    warn!("Built without the webrtc feature, incoming calls will be declined");
    Arc::new(crate::media::UnavailableMediaConnector)
}

/// End the WhatsApp side of a call once its bridge is gone.
///
/// A caller hangup means WhatsApp already ended the call, so the id is only
/// forgotten.
fn terminate_on_completion(whatsapp: Arc<WhatsAppClient>) -> CompletionCallback {
    Arc::new(move |call_id: String, outcome: CallOutcome| {
        let whatsapp = whatsapp.clone();
        let done: CompletionFuture = Box::pin(async move {
            if matches!(outcome, CallOutcome::Cancelled(CancelReason::Hangup)) {
                whatsapp.forget(&call_id);
                return;
            }

            debug!(call_id = %call_id, %outcome, "Terminating WhatsApp call");
            if let Err(e) = whatsapp.terminate(&call_id).await {
                warn!(call_id = %call_id, "Failed to terminate WhatsApp call: {e}");
                whatsapp.forget(&call_id);
            }
        });
        done
    })
}
