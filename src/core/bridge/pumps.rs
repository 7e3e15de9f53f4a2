//! Directional audio pumps between a media connection and a bridge.
//!
//! Both pumps run until the bridge's running flag clears or the media
//! transport ends. Cancellation is the normal way out and is reported as
//! [`PumpExit::Stopped`].

use std::sync::Arc;
use tracing::{debug, warn};

use super::call_bridge::CallBridge;
use crate::core::audio::PcmConverter;
use crate::media::{MediaConnection, MediaError};

/// How a pump finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The running flag cleared.
    Stopped,
    /// The media transport reported end of stream.
    EndOfStream,
    /// The media transport failed.
    TransportError(String),
}

/// Caller audio: media transport to remote session.
pub async fn inbound_pump(bridge: Arc<CallBridge>, media: Arc<dyn MediaConnection>) -> PumpExit {
    let running = bridge.running_token();
    let mut converter = PcmConverter::new(media.format(), bridge.input_format());
    debug!(
        call_id = %bridge.call_id(),
        from = %converter.source(),
        to = %converter.target(),
        "Inbound pump started"
    );

    loop {
        let frame = tokio::select! {
            biased;
            _ = running.cancelled() => return PumpExit::Stopped,
            frame = media.recv_audio() => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                let pcm = converter.convert(&frame);
                if !pcm.is_empty() {
                    bridge.send_inbound_audio(pcm).await;
                }
            }
            Ok(None) => {
                debug!(call_id = %bridge.call_id(), "Caller media ended");
                return PumpExit::EndOfStream;
            }
            Err(MediaError::Closed) => return PumpExit::EndOfStream,
            Err(e) => {
                warn!(call_id = %bridge.call_id(), "Inbound media error: {e}");
                return PumpExit::TransportError(e.to_string());
            }
        }
    }
}

/// Assistant audio: output buffer to media transport.
pub async fn outbound_pump(bridge: Arc<CallBridge>, media: Arc<dyn MediaConnection>) -> PumpExit {
    let running = bridge.running_token();
    let poll = bridge.outbound_poll_interval();
    let mut converter = PcmConverter::new(bridge.output_format(), media.format());

    while !running.is_cancelled() {
        let Some(chunk) = bridge.receive_outbound_audio(poll).await else {
            continue;
        };

        let pcm = converter.convert(&chunk);
        if pcm.is_empty() {
            continue;
        }

        match media.send_audio(pcm).await {
            Ok(()) => {}
            Err(MediaError::Closed) => {
                debug!(call_id = %bridge.call_id(), "Caller media closed");
                return PumpExit::EndOfStream;
            }
            Err(e) => {
                warn!(call_id = %bridge.call_id(), "Outbound media error: {e}");
                return PumpExit::TransportError(e.to_string());
            }
        }
    }

    PumpExit::Stopped
}
