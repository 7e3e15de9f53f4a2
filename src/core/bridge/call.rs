//! Per-call orchestration: pumps, teardown and outcome.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::call_bridge::CallBridge;
use super::events::Termination;
use super::pumps::{PumpExit, inbound_pump, outbound_pump};
use crate::media::MediaConnection;

/// How long teardown waits for a pump before aborting it.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a call was cancelled from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// WhatsApp reported that the call ended.
    Hangup,
    /// The process is shutting down.
    Shutdown,
}

/// External cancellation handle for one call.
///
/// Created as a child of the registry's shutdown token, so a shutdown
/// cancels every call without touching them one by one.
#[derive(Debug, Clone)]
pub struct CallControl {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CallControl {
    pub fn new() -> Self {
        Self::from_token(CancellationToken::new())
    }

    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::from_token(parent.child_token())
    }

    fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Cancel the call. The first reason given wins.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Reason for cancellation. Inherited cancellation counts as shutdown.
    pub fn reason(&self) -> CancelReason {
        self.reason.get().copied().unwrap_or(CancelReason::Shutdown)
    }
}

impl Default for CallControl {
    fn default() -> Self {
        Self::new()
    }
}

/// How a call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// Cancelled from outside; not a failure.
    Cancelled(CancelReason),
    /// The caller's media stream ended.
    CallerHungUp,
    /// The remote session closed its stream.
    RemoteClosed,
    /// The remote session reported an error.
    RemoteError { code: String, message: String },
    /// The media transport failed.
    MediaFailed(String),
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CallOutcome::RemoteError { .. } | CallOutcome::MediaFailed(_)
        )
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Cancelled(CancelReason::Hangup) => write!(f, "cancelled (hangup)"),
            CallOutcome::Cancelled(CancelReason::Shutdown) => write!(f, "cancelled (shutdown)"),
            CallOutcome::CallerHungUp => write!(f, "caller hung up"),
            CallOutcome::RemoteClosed => write!(f, "remote closed"),
            CallOutcome::RemoteError { code, message } => {
                write!(f, "remote error {code}: {message}")
            }
            CallOutcome::MediaFailed(e) => write!(f, "media failed: {e}"),
        }
    }
}

/// Run one connected call to completion.
///
/// Returns once both pumps have exited, the bridge is closed and the media
/// connection is closed, whichever side ended the call.
pub async fn run_call(
    bridge: Arc<CallBridge>,
    media: Arc<dyn MediaConnection>,
    control: CallControl,
) -> CallOutcome {
    let call_id = bridge.call_id().to_string();
    let running = bridge.running_token();

    let mut inbound = tokio::spawn(inbound_pump(bridge.clone(), media.clone()));
    let mut outbound = tokio::spawn(outbound_pump(bridge.clone(), media.clone()));

    let mut inbound_exit = None;
    let mut outbound_exit = None;

    let cancelled = tokio::select! {
        _ = control.cancelled() => Some(control.reason()),
        _ = running.cancelled() => None,
        exit = &mut inbound => {
            inbound_exit = Some(join_result(exit));
            None
        }
        exit = &mut outbound => {
            outbound_exit = Some(join_result(exit));
            None
        }
    };

    debug!(call_id = %call_id, ?cancelled, "Call ending, stopping pumps");
    bridge.stop();

    let inbound_exit = match inbound_exit {
        Some(exit) => exit,
        None => join_pump(&call_id, "inbound", inbound).await,
    };
    let outbound_exit = match outbound_exit {
        Some(exit) => exit,
        None => join_pump(&call_id, "outbound", outbound).await,
    };

    bridge.disconnect().await;
    if let Err(e) = media.close().await {
        warn!(call_id = %call_id, "Error closing media connection: {e}");
    }

    resolve_outcome(
        cancelled,
        [inbound_exit, outbound_exit],
        bridge.termination(),
        control.reason(),
    )
}

fn join_result(result: Result<PumpExit, tokio::task::JoinError>) -> PumpExit {
    result.unwrap_or_else(|e| PumpExit::TransportError(format!("pump task failed: {e}")))
}

async fn join_pump(call_id: &str, name: &str, mut handle: JoinHandle<PumpExit>) -> PumpExit {
    match timeout(PUMP_JOIN_TIMEOUT, &mut handle).await {
        Ok(result) => join_result(result),
        Err(_) => {
            warn!(call_id = %call_id, pump = name, "Pump did not stop in time, aborting");
            handle.abort();
            PumpExit::Stopped
        }
    }
}

/// External cancellation wins, then whichever side ended first.
fn resolve_outcome(
    cancelled: Option<CancelReason>,
    pumps: [PumpExit; 2],
    termination: Option<Termination>,
    fallback: CancelReason,
) -> CallOutcome {
    if let Some(reason) = cancelled {
        return CallOutcome::Cancelled(reason);
    }

    for exit in &pumps {
        if let PumpExit::TransportError(e) = exit {
            return CallOutcome::MediaFailed(e.clone());
        }
    }
    if pumps.contains(&PumpExit::EndOfStream) {
        return CallOutcome::CallerHungUp;
    }

    match termination {
        Some(Termination::RemoteClosed) => CallOutcome::RemoteClosed,
        Some(Termination::RemoteError { code, message }) => {
            CallOutcome::RemoteError { code, message }
        }
        None => CallOutcome::Cancelled(fallback),
    }
}
