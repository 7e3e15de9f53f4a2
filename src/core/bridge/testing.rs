//! Scripted speech sessions for unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::core::audio::AudioFormat;
use crate::core::realtime::{
    ConnectionState, EventStream, InboundEvent, RealtimeError, RealtimeResult, SpeechSession,
    SpeechSessionFactory,
};

#[derive(Debug, Clone, Copy, Default)]
pub(crate) enum Handshake {
    #[default]
    Accept,
    Refuse,
    Hang,
    /// Accept after a delay.
    Delay(Duration),
}

/// Test-side handle to a [`MockSession`].
#[derive(Clone, Default)]
pub(crate) struct MockRemote {
    events: Arc<Mutex<Option<mpsc::Sender<InboundEvent>>>>,
    sent: Arc<Mutex<Vec<Bytes>>>,
    disconnects: Arc<AtomicUsize>,
}

impl MockRemote {
    pub(crate) async fn emit(&self, event: InboundEvent) {
        let tx = self.events.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// End the event stream as if the socket closed.
    pub(crate) fn close(&self) {
        self.events.lock().take();
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockSession {
    stream: Mutex<Option<EventStream>>,
    remote: MockRemote,
    handshake: Handshake,
}

impl MockSession {
    pub(crate) fn new(handshake: Handshake) -> (Arc<Self>, MockRemote) {
        let (tx, rx) = mpsc::channel(64);
        let remote = MockRemote {
            events: Arc::new(Mutex::new(Some(tx))),
            ..Default::default()
        };
        let session = Arc::new(Self {
            stream: Mutex::new(Some(rx)),
            remote: remote.clone(),
            handshake,
        });
        (session, remote)
    }
}

#[async_trait]
impl SpeechSession for MockSession {
    async fn connect(&self) -> RealtimeResult<EventStream> {
        match self.handshake {
            Handshake::Accept => self.stream.lock().take().ok_or(RealtimeError::NotConnected),
            Handshake::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.stream.lock().take().ok_or(RealtimeError::NotConnected)
            }
            Handshake::Refuse => Err(RealtimeError::ConnectionFailed("refused".to_string())),
            Handshake::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RealtimeError::Timeout("hung".to_string()))
            }
        }
    }

    async fn send_audio(&self, audio: Bytes) -> RealtimeResult<()> {
        self.remote.sent.lock().push(audio);
        Ok(())
    }

    async fn disconnect(&self) -> RealtimeResult<()> {
        self.remote.disconnects.fetch_add(1, Ordering::SeqCst);
        self.remote.close();
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }

    fn input_format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::default()
    }
}

/// Factory that records a [`MockRemote`] per call id.
#[derive(Default)]
pub(crate) struct MockFactory {
    handshake: Handshake,
    remotes: Mutex<HashMap<String, MockRemote>>,
}

impl MockFactory {
    pub(crate) fn with_handshake(handshake: Handshake) -> Self {
        Self {
            handshake,
            ..Default::default()
        }
    }

    pub(crate) fn remote(&self, call_id: &str) -> Option<MockRemote> {
        self.remotes.lock().get(call_id).cloned()
    }
}

impl SpeechSessionFactory for MockFactory {
    fn create(&self, call_id: &str) -> RealtimeResult<Arc<dyn SpeechSession>> {
        let (session, remote) = MockSession::new(self.handshake);
        self.remotes.lock().insert(call_id.to_string(), remote);
        Ok(session)
    }
}
