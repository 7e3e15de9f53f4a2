//! Registry of active calls.
//!
//! The registry is an owned object held by the application state; nothing
//! about active calls lives in globals. Each accepted call is spawned on a
//! [`TaskTracker`] and removes its own entry when [`run_call`] returns, so
//! cleanup happens exactly once on every termination path.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::bridge::{
    BridgeConfig, CallBridge, CallControl, CallOutcome, CancelReason, ConnectError, run_call,
};
use crate::core::realtime::SpeechSessionFactory;
use crate::media::MediaConnection;

/// Invoked once per call after it has been removed from the registry.
pub type CompletionCallback = Arc<dyn Fn(String, CallOutcome) -> CompletionFuture + Send + Sync>;

pub type CompletionFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Call {0} is already active")]
    DuplicateCall(String),

    #[error("Call registry is shutting down")]
    ShuttingDown,

    #[error("Failed to connect call: {0}")]
    Connect(#[from] ConnectError),
}

struct CallEntry {
    control: CallControl,
    bridge: Arc<CallBridge>,
    started_at: Instant,
    /// Distinguishes a finished call from a later call reusing its id.
    session_id: Uuid,
}

/// Tracks every running call and owns their cancellation.
pub struct CallRegistry {
    calls: DashMap<String, CallEntry>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    factory: Arc<dyn SpeechSessionFactory>,
    config: BridgeConfig,
    on_complete: Option<CompletionCallback>,
}

impl CallRegistry {
    pub fn new(factory: Arc<dyn SpeechSessionFactory>, config: BridgeConfig) -> Self {
        Self {
            calls: DashMap::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            factory,
            config,
            on_complete: None,
        }
    }

    pub fn with_completion_callback(mut self, callback: CompletionCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    /// Run call setup work (media negotiation, WhatsApp accept) on the
    /// registry's tracker so [`shutdown`](Self::shutdown) waits for it.
    ///
    /// Returns `false` without spawning once shutdown has begun.
    pub fn spawn_setup<F>(&self, setup: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Held across the check so shutdown cannot finish waiting in between
        let token = self.tracker.token();
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.tracker.spawn(async move {
            setup.await;
            drop(token);
        });
        true
    }

    /// Connect a bridge for `call_id` and run the call in the background.
    ///
    /// On any error the media connection is closed and nothing is
    /// registered. Shutdown waits for a connect in progress and the call is
    /// refused if shutdown began while it was connecting.
    pub async fn start_call(
        self: &Arc<Self>,
        call_id: &str,
        media: Arc<dyn MediaConnection>,
    ) -> Result<(), RegistryError> {
        let _setup = self.tracker.token();

        if let Err(e) = self.check_can_start(call_id) {
            close_media(call_id, &media).await;
            return Err(e);
        }

        let bridge = Arc::new(CallBridge::new(
            call_id,
            self.factory.clone(),
            self.config.clone(),
        ));

        if let Err(e) = bridge.connect().await {
            warn!(call_id = %call_id, "Bridge connect failed: {e}");
            bridge.disconnect().await;
            close_media(call_id, &media).await;
            return Err(e.into());
        }

        if self.shutdown.is_cancelled() {
            info!(call_id = %call_id, "Shutdown began during connect, dropping call");
            bridge.disconnect().await;
            close_media(call_id, &media).await;
            return Err(RegistryError::ShuttingDown);
        }

        let control = CallControl::child_of(&self.shutdown);
        let session_id = Uuid::new_v4();

        let inserted = match self.calls.entry(call_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(CallEntry {
                    control: control.clone(),
                    bridge: bridge.clone(),
                    started_at: Instant::now(),
                    session_id,
                });
                true
            }
        };

        if !inserted {
            bridge.disconnect().await;
            close_media(call_id, &media).await;
            return Err(RegistryError::DuplicateCall(call_id.to_string()));
        }

        info!(call_id = %call_id, %session_id, active_calls = self.calls.len(), "Call started");

        let registry = Arc::clone(self);
        let call_id = call_id.to_string();
        self.tracker.spawn(async move {
            let outcome = run_call(bridge, media, control).await;
            registry.finish_call(call_id, session_id, outcome).await;
        });

        Ok(())
    }

    fn check_can_start(&self, call_id: &str) -> Result<(), RegistryError> {
        if self.shutdown.is_cancelled() {
            return Err(RegistryError::ShuttingDown);
        }
        if self.calls.contains_key(call_id) {
            return Err(RegistryError::DuplicateCall(call_id.to_string()));
        }
        Ok(())
    }

    async fn finish_call(&self, call_id: String, session_id: Uuid, outcome: CallOutcome) {
        let removed = self
            .calls
            .remove_if(&call_id, |_, entry| entry.session_id == session_id);

        let duration = removed
            .as_ref()
            .map(|(_, entry)| entry.started_at.elapsed())
            .unwrap_or_default();

        if outcome.is_failure() {
            warn!(call_id = %call_id, ?duration, %outcome, "Call ended");
        } else {
            info!(call_id = %call_id, ?duration, %outcome, "Call ended");
        }

        if let Some(ref callback) = self.on_complete {
            callback(call_id, outcome).await;
        }
    }

    /// Cancel a call because the caller hung up. Returns `false` when the
    /// call is unknown.
    pub fn hangup(&self, call_id: &str) -> bool {
        match self.calls.get(call_id) {
            Some(entry) => {
                debug!(call_id = %call_id, "Hanging up call");
                entry.control.cancel(CancelReason::Hangup);
                true
            }
            None => false,
        }
    }

    /// Cancel every call and wait up to `timeout` for all of them to close.
    ///
    /// Returns `true` when every call finished in time. No new calls are
    /// accepted afterwards.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(active_calls = self.calls.len(), "Shutting down call registry");
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("All calls closed");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.calls.len(),
                    "Timed out waiting for calls to close"
                );
                false
            }
        }
    }

    pub fn active_calls(&self) -> usize {
        self.calls.len()
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.calls.iter().map(|e| e.key().clone()).collect()
    }

    pub fn bridge(&self, call_id: &str) -> Option<Arc<CallBridge>> {
        self.calls.get(call_id).map(|e| e.bridge.clone())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn close_media(call_id: &str, media: &Arc<dyn MediaConnection>) {
    if let Err(e) = media.close().await {
        warn!(call_id = %call_id, "Error closing media connection: {e}");
    }
}
