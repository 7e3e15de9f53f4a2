//! Abstract WebRTC media transport.
//!
//! The bridge never touches ICE, DTLS or codecs. It sees a call's media as a
//! [`MediaConnection`] that yields and accepts PCM16 frames in a declared
//! [`AudioFormat`], created by a [`MediaConnector`] from the caller's SDP
//! offer.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use crate::core::audio::AudioFormat;

mod channel;
mod unavailable;
#[cfg(feature = "webrtc")]
mod webrtc;

pub use channel::{
    ChannelMediaConnection, ChannelMediaConnector, DEFAULT_CHANNEL_CAPACITY, IncomingMedia, MediaPeer,
    channel_pair,
};
pub use unavailable::UnavailableMediaConnector;
#[cfg(feature = "webrtc")]
pub use webrtc::{CALL_AUDIO_FORMAT, OpusCodec, PcmFramer, WebRtcConfig, WebRtcMediaConnector};

/// Errors from the media transport.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The connection was closed locally or by the peer.
    #[error("Media connection closed")]
    Closed,

    /// The SDP offer could not be answered.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// No media engine is available to answer offers.
    #[error("Media transport unsupported: {0}")]
    Unsupported(String),

    #[error("Media transport error: {0}")]
    Transport(String),

    #[error("Audio codec error: {0}")]
    Codec(String),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// One call's audio path to the caller.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Next caller frame. `Ok(None)` means end of stream.
    ///
    /// Must be cancel safe: it is raced against the bridge's running flag.
    async fn recv_audio(&self) -> MediaResult<Option<Bytes>>;

    /// Play one frame to the caller.
    async fn send_audio(&self, frame: Bytes) -> MediaResult<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self) -> MediaResult<()>;

    /// PCM layout of frames in both directions.
    fn format(&self) -> AudioFormat;
}

/// Answer of a negotiated media session.
pub struct MediaSession {
    pub connection: Arc<dyn MediaConnection>,
    pub sdp_answer: String,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("format", &self.connection.format())
            .field("sdp_answer_len", &self.sdp_answer.len())
            .finish()
    }
}

/// Creates media connections from SDP offers.
#[async_trait]
pub trait MediaConnector: Send + Sync {
    async fn connect(&self, call_id: &str, sdp_offer: &str) -> MediaResult<MediaSession>;
}
