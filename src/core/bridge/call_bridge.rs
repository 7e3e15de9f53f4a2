//! Per-call bridge between a media connection and a remote speech session.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::buffer::{DEFAULT_OUTPUT_BUFFER_CAPACITY, OutputBuffer};
use super::events::{EventLoop, Termination, TerminationSlot};
use super::state::BridgeState;
use super::stats::{BridgeStats, StatsSnapshot};
use crate::core::audio::AudioFormat;
use crate::core::realtime::{RealtimeError, SpeechSession, SpeechSessionFactory};

/// How long `disconnect` waits for the event loop to notice the cleared flag.
const EVENT_LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors returned by [`CallBridge::connect`].
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `connect` was called on a bridge that is not idle.
    #[error("Bridge is {0}, expected idle")]
    InvalidState(BridgeState),
}

impl From<RealtimeError> for ConnectError {
    fn from(err: RealtimeError) -> Self {
        match err {
            RealtimeError::MissingCredential(msg) => ConnectError::MissingCredential(msg),
            RealtimeError::InvalidConfiguration(msg) => ConnectError::InvalidConfiguration(msg),
            other => ConnectError::HandshakeFailed(other.to_string()),
        }
    }
}

/// Tunables shared by every bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Output buffer bound in chunks.
    pub output_buffer_capacity: usize,
    /// Outbound pump poll timeout.
    pub outbound_poll_interval: Duration,
    /// Discard queued assistant audio when the caller barges in.
    pub flush_on_interruption: bool,
    /// Upper bound on the remote handshake.
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            output_buffer_capacity: DEFAULT_OUTPUT_BUFFER_CAPACITY,
            outbound_poll_interval: Duration::from_millis(100),
            flush_on_interruption: true,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Per-call state: one remote session, one output buffer, one event loop.
///
/// All methods take `&self`; the bridge is shared as `Arc<CallBridge>`
/// between the pumps and the call owner.
pub struct CallBridge {
    call_id: String,
    factory: Arc<dyn SpeechSessionFactory>,
    config: BridgeConfig,
    state: RwLock<BridgeState>,
    session: Mutex<Option<Arc<dyn SpeechSession>>>,
    formats: RwLock<(AudioFormat, AudioFormat)>,
    buffer: Arc<OutputBuffer>,
    running: CancellationToken,
    event_loop: Mutex<Option<JoinHandle<Option<Termination>>>>,
    termination: TerminationSlot,
    stats: Arc<BridgeStats>,
}

impl std::fmt::Debug for CallBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBridge")
            .field("call_id", &self.call_id)
            .field("state", &*self.state.read())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl CallBridge {
    pub fn new(
        call_id: impl Into<String>,
        factory: Arc<dyn SpeechSessionFactory>,
        config: BridgeConfig,
    ) -> Self {
        let buffer = Arc::new(OutputBuffer::new(config.output_buffer_capacity));
        Self {
            call_id: call_id.into(),
            factory,
            config,
            state: RwLock::new(BridgeState::Idle),
            session: Mutex::new(None),
            formats: RwLock::new((AudioFormat::default(), AudioFormat::default())),
            buffer,
            running: CancellationToken::new(),
            event_loop: Mutex::new(None),
            termination: Arc::new(Mutex::new(None)),
            stats: Arc::new(BridgeStats::default()),
        }
    }

    /// Open the remote session and start the event loop.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        {
            let mut state = self.state.write();
            if *state != BridgeState::Idle {
                return Err(ConnectError::InvalidState(*state));
            }
            *state = BridgeState::Connecting;
        }

        info!(call_id = %self.call_id, "Connecting remote speech session");

        let session = match self.factory.create(&self.call_id) {
            Ok(session) => session,
            Err(e) => {
                self.close_after_failed_connect();
                return Err(e.into());
            }
        };

        let events = match timeout(self.config.connect_timeout, session.connect()).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                warn!(call_id = %self.call_id, "Remote handshake failed: {e}");
                self.close_after_failed_connect();
                let _ = session.disconnect().await;
                return Err(e.into());
            }
            Err(_) => {
                warn!(call_id = %self.call_id, "Remote handshake timed out");
                self.close_after_failed_connect();
                let _ = session.disconnect().await;
                return Err(ConnectError::HandshakeFailed(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        // Publish session, spawn the loop and go Active in one step so a
        // concurrent disconnect either sees all of it or none of it.
        let raced = {
            let mut state = self.state.write();
            if *state == BridgeState::Connecting {
                *self.formats.write() = (session.input_format(), session.output_format());
                *self.session.lock() = Some(session.clone());

                let event_loop = EventLoop::new(
                    self.call_id.clone(),
                    self.buffer.clone(),
                    self.running.clone(),
                    self.config.flush_on_interruption,
                    self.termination.clone(),
                    self.stats.clone(),
                );
                *self.event_loop.lock() = Some(tokio::spawn(event_loop.run(events)));
                *state = BridgeState::Active;
                None
            } else {
                Some(*state)
            }
        };

        if let Some(state) = raced {
            debug!(call_id = %self.call_id, %state, "Bridge closed during handshake");
            let _ = session.disconnect().await;
            return Err(ConnectError::InvalidState(state));
        }

        info!(call_id = %self.call_id, "Bridge active");
        Ok(())
    }

    fn close_after_failed_connect(&self) {
        self.running.cancel();
        let mut state = self.state.write();
        if *state == BridgeState::Connecting {
            *state = BridgeState::Closed;
        }
    }

    /// Best-effort teardown. Only the first call does any work.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                return;
            }
            *state = BridgeState::Disconnecting;
        }

        debug!(call_id = %self.call_id, "Disconnecting bridge");
        self.running.cancel();

        let handle = self.event_loop.lock().take();
        if let Some(mut handle) = handle {
            match timeout(EVENT_LOOP_JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(call_id = %self.call_id, "Event loop task failed: {e}"),
                Err(_) => {
                    warn!(call_id = %self.call_id, "Event loop did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        let session = self.session.lock().take();
        if let Some(session) = session
            && let Err(e) = session.disconnect().await
        {
            warn!(call_id = %self.call_id, "Error closing remote session: {e}");
        }

        let discarded = self.buffer.clear();
        *self.state.write() = BridgeState::Closed;

        let stats = self.stats.snapshot();
        info!(
            call_id = %self.call_id,
            events = stats.events,
            inbound_chunks = stats.inbound_chunks,
            outbound_chunks = stats.outbound_chunks,
            interruptions = stats.interruptions,
            dropped_chunks = self.buffer.dropped(),
            discarded,
            "Bridge closed"
        );
    }

    /// Forward one caller audio chunk. Dropped unless the bridge is active.
    pub async fn send_inbound_audio(&self, chunk: Bytes) {
        if *self.state.read() != BridgeState::Active || self.running.is_cancelled() {
            return;
        }

        let session = self.session.lock().clone();
        let Some(session) = session else {
            return;
        };

        match session.send_audio(chunk).await {
            Ok(()) => self.stats.record_inbound(),
            Err(e) => debug!(call_id = %self.call_id, "Dropped inbound audio: {e}"),
        }
    }

    /// Pop one assistant audio chunk, waiting at most `wait`.
    pub async fn receive_outbound_audio(&self, wait: Duration) -> Option<Bytes> {
        let chunk = self.buffer.pop(wait, &self.running).await?;
        self.stats.record_outbound();
        Some(chunk)
    }

    /// Clear the running flag without tearing anything down.
    pub fn stop(&self) {
        self.running.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    /// Token cancelled when the bridge stops running for any reason.
    pub fn running_token(&self) -> CancellationToken {
        self.running.clone()
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// PCM layout the remote session accepts.
    pub fn input_format(&self) -> AudioFormat {
        self.formats.read().0
    }

    /// PCM layout of buffered assistant audio.
    pub fn output_format(&self) -> AudioFormat {
        self.formats.read().1
    }

    pub fn outbound_poll_interval(&self) -> Duration {
        self.config.outbound_poll_interval
    }

    /// Why the remote side ended the call, if it did.
    pub fn termination(&self) -> Option<Termination> {
        self.termination.lock().clone()
    }

    pub fn buffered_chunks(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
