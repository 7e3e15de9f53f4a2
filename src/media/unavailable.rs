use async_trait::async_trait;
use tracing::warn;

use super::{MediaConnector, MediaError, MediaResult, MediaSession};

/// Connector used when no WebRTC engine is linked into the process.
///
/// Every offer is declined, so inbound calls take the connect-failure path:
/// nothing is registered and the WhatsApp call is terminated.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableMediaConnector;

#[async_trait]
impl MediaConnector for UnavailableMediaConnector {
    async fn connect(&self, call_id: &str, _sdp_offer: &str) -> MediaResult<MediaSession> {
        warn!(call_id = %call_id, "No media engine configured, declining call");
        Err(MediaError::Unsupported(
            "no WebRTC media engine is configured".to_string(),
        ))
    }
}
