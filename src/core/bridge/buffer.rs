//! Bounded FIFO between the event loop and the outbound pump.
//!
//! Single producer (event loop), single consumer (outbound pump). When the
//! consumer stalls the oldest chunk is dropped so the caller hears recent
//! speech instead of an ever-growing backlog.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default capacity in chunks.
pub const DEFAULT_OUTPUT_BUFFER_CAPACITY: usize = 256;

/// Bounded drop-oldest audio queue.
#[derive(Debug)]
pub struct OutputBuffer {
    queue: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    notify: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl OutputBuffer {
    /// Create a buffer holding at most `capacity` chunks (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            notify: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a chunk, evicting the oldest one when full.
    ///
    /// Returns `true` when a chunk was evicted.
    pub fn push(&self, chunk: Bytes) -> bool {
        let evicted = {
            let mut queue = self.queue.lock();
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front().is_some()
            } else {
                false
            };
            queue.push_back(chunk);
            evicted
        };

        self.pushed.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    /// Pop the oldest chunk, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or as soon as `cancel` fires. Nothing is
    /// returned once `cancel` has fired, even if chunks remain.
    pub async fn pop(&self, timeout: Duration, cancel: &CancellationToken) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(chunk) = self.queue.lock().pop_front() {
                return Some(chunk);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = &mut notified => continue,
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.lock().pop_front()
    }

    /// Discard everything queued. Returns the number of chunks discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks accepted since creation.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Chunks evicted by the drop-oldest policy.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BUFFER_CAPACITY)
    }
}
