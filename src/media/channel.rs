//! In-process media transport backed by tokio channels.
//!
//! The agent side is a [`ChannelMediaConnection`]; the far end is a
//! [`MediaPeer`] that an embedding WebRTC engine (or a test) uses to push
//! decoded caller audio and pull agent audio.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{MediaConnection, MediaConnector, MediaError, MediaResult, MediaSession};
use crate::core::audio::AudioFormat;

/// Frames buffered per direction.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Agent side of an in-process media path.
#[derive(Debug)]
pub struct ChannelMediaConnection {
    from_caller: Mutex<mpsc::Receiver<Bytes>>,
    to_caller: mpsc::Sender<Bytes>,
    format: AudioFormat,
    closed: CancellationToken,
}

/// Caller side of an in-process media path.
#[derive(Debug)]
pub struct MediaPeer {
    to_agent: mpsc::Sender<Bytes>,
    from_agent: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
}

/// Create a connected agent/caller pair.
pub fn channel_pair(format: AudioFormat, capacity: usize) -> (ChannelMediaConnection, MediaPeer) {
    let (to_agent, from_caller) = mpsc::channel(capacity.max(1));
    let (to_caller, from_agent) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();

    let connection = ChannelMediaConnection {
        from_caller: Mutex::new(from_caller),
        to_caller,
        format,
        closed: closed.clone(),
    };
    let peer = MediaPeer {
        to_agent,
        from_agent,
        closed,
    };

    (connection, peer)
}

impl ChannelMediaConnection {
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl MediaConnection for ChannelMediaConnection {
    async fn recv_audio(&self) -> MediaResult<Option<Bytes>> {
        if self.closed.is_cancelled() {
            return Ok(None);
        }

        let mut rx = self.from_caller.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            frame = rx.recv() => Ok(frame),
        }
    }

    async fn send_audio(&self, frame: Bytes) -> MediaResult<()> {
        if self.closed.is_cancelled() {
            return Err(MediaError::Closed);
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(MediaError::Closed),
            sent = self.to_caller.send(frame) => sent.map_err(|_| MediaError::Closed),
        }
    }

    async fn close(&self) -> MediaResult<()> {
        self.closed.cancel();
        Ok(())
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

impl MediaPeer {
    /// Deliver one caller frame to the agent.
    pub async fn send(&self, frame: Bytes) -> MediaResult<()> {
        if self.closed.is_cancelled() {
            return Err(MediaError::Closed);
        }
        self.to_agent.send(frame).await.map_err(|_| MediaError::Closed)
    }

    /// Deliver one caller frame without waiting. Fails when the agent is
    /// not keeping up.
    pub fn try_send(&self, frame: Bytes) -> MediaResult<()> {
        if self.closed.is_cancelled() {
            return Err(MediaError::Closed);
        }
        self.to_agent.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                MediaError::Transport("caller audio queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => MediaError::Closed,
        })
    }

    /// Next frame played by the agent, or `None` once the agent side is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            frame = self.from_agent.recv() => frame,
            _ = self.closed.cancelled() => self.from_agent.try_recv().ok(),
        }
    }

    /// True once the agent closed the connection.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the agent closes the connection.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// End the caller's stream. The agent sees end of stream.
    pub fn hang_up(self) {
        debug!("Media peer hung up");
    }
}

/// A call handed to the embedding engine by [`ChannelMediaConnector`].
#[derive(Debug)]
pub struct IncomingMedia {
    pub call_id: String,
    pub sdp_offer: String,
    pub peer: MediaPeer,
}

/// Connector that answers every offer with a fixed SDP and hands the far
/// end of each call to a receiver.
///
/// # Example
/// ```
/// use mello_phone_agent::core::audio::AudioFormat;
/// use mello_phone_agent::media::{ChannelMediaConnector, MediaConnector};
///
/// # tokio_test::block_on(async {
/// let (connector, mut incoming) = ChannelMediaConnector::new(AudioFormat::mono(16_000), "v=0");
/// let session = connector.connect("wacid.1", "v=0 offer").await.unwrap();
/// assert_eq!(session.sdp_answer, "v=0");
///
/// let call = incoming.recv().await.unwrap();
/// assert_eq!(call.call_id, "wacid.1");
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct ChannelMediaConnector {
    format: AudioFormat,
    capacity: usize,
    sdp_answer: String,
    incoming: mpsc::UnboundedSender<IncomingMedia>,
}

impl ChannelMediaConnector {
    pub fn new(
        format: AudioFormat,
        sdp_answer: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<IncomingMedia>) {
        let (incoming, rx) = mpsc::unbounded_channel();
        let connector = Self {
            format,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            sdp_answer: sdp_answer.into(),
            incoming,
        };
        (connector, rx)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[async_trait]
impl MediaConnector for ChannelMediaConnector {
    async fn connect(&self, call_id: &str, sdp_offer: &str) -> MediaResult<MediaSession> {
        if sdp_offer.trim().is_empty() {
            return Err(MediaError::Negotiation("empty SDP offer".to_string()));
        }

        let (connection, peer) = channel_pair(self.format, self.capacity);
        self.incoming
            .send(IncomingMedia {
                call_id: call_id.to_string(),
                sdp_offer: sdp_offer.to_string(),
                peer,
            })
            .map_err(|_| MediaError::Transport("media engine is not listening".to_string()))?;

        Ok(MediaSession {
            connection: Arc::new(connection),
            sdp_answer: self.sdp_answer.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (conn, mut peer) = channel_pair(AudioFormat::mono(48_000), 4);

        peer.send(Bytes::from_static(b"caller")).await.unwrap();
        assert_eq!(
            conn.recv_audio().await.unwrap(),
            Some(Bytes::from_static(b"caller"))
        );

        conn.send_audio(Bytes::from_static(b"agent")).await.unwrap();
        assert_eq!(peer.recv().await, Some(Bytes::from_static(b"agent")));
        assert_eq!(conn.format(), AudioFormat::mono(48_000));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let (conn, peer) = channel_pair(AudioFormat::default(), 1);

        peer.try_send(Bytes::from_static(b"a")).unwrap();
        assert!(matches!(
            peer.try_send(Bytes::from_static(b"b")),
            Err(MediaError::Transport(_))
        ));

        assert_eq!(conn.recv_audio().await.unwrap(), Some(Bytes::from_static(b"a")));
        conn.close().await.unwrap();
        assert!(matches!(
            peer.try_send(Bytes::from_static(b"c")),
            Err(MediaError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_hang_up_is_end_of_stream() {
        let (conn, peer) = channel_pair(AudioFormat::default(), 4);
        peer.hang_up();
        assert_eq!(conn.recv_audio().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_visible_to_peer() {
        let (conn, mut peer) = channel_pair(AudioFormat::default(), 4);

        conn.close().await.unwrap();
        conn.close().await.unwrap();

        assert!(conn.is_closed());
        assert!(peer.is_closed());
        assert_eq!(conn.recv_audio().await.unwrap(), None);
        assert!(matches!(
            conn.send_audio(Bytes::from_static(b"x")).await,
            Err(MediaError::Closed)
        ));
        assert!(peer.send(Bytes::from_static(b"y")).await.is_err());
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn test_connector_hands_out_peer() {
        let (connector, mut incoming) =
            ChannelMediaConnector::new(AudioFormat::mono(48_000), "v=0 answer");

        let session = connector.connect("wacid.1", "v=0 offer").await.unwrap();
        assert_eq!(session.sdp_answer, "v=0 answer");

        let call = incoming.recv().await.unwrap();
        assert_eq!(call.call_id, "wacid.1");
        assert_eq!(call.sdp_offer, "v=0 offer");

        call.peer.send(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(
            session.connection.recv_audio().await.unwrap(),
            Some(Bytes::from_static(b"hi"))
        );
    }

    #[tokio::test]
    async fn test_connector_rejects_empty_offer() {
        let (connector, _incoming) = ChannelMediaConnector::new(AudioFormat::default(), "answer");
        assert!(matches!(
            connector.connect("wacid.1", " ").await,
            Err(MediaError::Negotiation(_))
        ));
    }
}
