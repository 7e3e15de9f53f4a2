//! Inbound event processing loop.
//!
//! The loop is the only writer to the [`OutputBuffer`] and the only reader of
//! session-level control events. It never tears the session down itself: on
//! a fatal event or end of stream it records why, clears the running flag and
//! returns, leaving teardown to the bridge owner.

use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::buffer::OutputBuffer;
use super::stats::BridgeStats;
use crate::core::realtime::{EventStream, InboundEvent};

/// Number of emotions logged per user message.
const TOP_EMOTIONS: usize = 3;

/// Why the remote side ended the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The event stream ended (socket closed or dropped).
    RemoteClosed,
    /// The remote service reported an error.
    RemoteError { code: String, message: String },
}

pub(crate) type TerminationSlot = Arc<Mutex<Option<Termination>>>;

pub(crate) struct EventLoop {
    call_id: String,
    buffer: Arc<OutputBuffer>,
    running: CancellationToken,
    flush_on_interruption: bool,
    termination: TerminationSlot,
    stats: Arc<BridgeStats>,
}

impl EventLoop {
    pub(crate) fn new(
        call_id: String,
        buffer: Arc<OutputBuffer>,
        running: CancellationToken,
        flush_on_interruption: bool,
        termination: TerminationSlot,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            call_id,
            buffer,
            running,
            flush_on_interruption,
            termination,
            stats,
        }
    }

    /// Consume events until the running flag clears, the stream ends or a
    /// fatal event arrives.
    pub(crate) async fn run(self, mut events: EventStream) -> Option<Termination> {
        let termination = loop {
            tokio::select! {
                biased;
                _ = self.running.cancelled() => break None,
                event = events.recv() => match event {
                    Some(event) => {
                        self.stats.record_event();
                        if let ControlFlow::Break(termination) = self.dispatch(event) {
                            break Some(termination);
                        }
                    }
                    None => {
                        warn!(call_id = %self.call_id, "Remote event stream ended");
                        break Some(Termination::RemoteClosed);
                    }
                },
            }
        };

        if let Some(ref termination) = termination {
            *self.termination.lock() = Some(termination.clone());
        }
        self.running.cancel();
        debug!(call_id = %self.call_id, "Event loop exited");

        termination
    }

    fn dispatch(&self, event: InboundEvent) -> ControlFlow<Termination> {
        let call_id = self.call_id.as_str();

        match event {
            InboundEvent::ChatMetadata {
                chat_id,
                chat_group_id,
            } => {
                info!(call_id, chat_id = %chat_id, chat_group_id = ?chat_group_id, "EVI chat started");
            }

            InboundEvent::UserMessage {
                text,
                prosody,
                interim,
            } => {
                if interim {
                    debug!(call_id, "User (interim): {text}");
                } else {
                    info!(call_id, "User: {text}");
                }
                if let Some(scores) = prosody.filter(|s| !s.is_empty()) {
                    debug!(call_id, emotions = %scores.summary(TOP_EMOTIONS), "Top emotions");
                }
            }

            InboundEvent::AssistantMessage { text } => {
                info!(call_id, "Assistant: {text}");
            }

            InboundEvent::AudioOutput { payload } => self.enqueue(payload),

            InboundEvent::UserInterruption => {
                if self.flush_on_interruption {
                    let flushed = self.buffer.clear();
                    self.stats.record_interruption(flushed);
                    info!(call_id, flushed, "User interruption, discarded queued audio");
                } else {
                    self.stats.record_interruption(0);
                    info!(call_id, "User interruption");
                }
            }

            InboundEvent::Error { code, message } => {
                error!(call_id, code = %code, "Remote session error: {message}");
                return ControlFlow::Break(Termination::RemoteError { code, message });
            }

            InboundEvent::Unknown { kind } => {
                trace!(call_id, kind = %kind, "Ignoring unhandled event");
            }
        }

        ControlFlow::Continue(())
    }

    fn enqueue(&self, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        if self.buffer.push(payload) {
            debug!(
                call_id = %self.call_id,
                dropped = self.buffer.dropped(),
                "Output buffer full, dropped oldest chunk"
            );
        }
    }
}
