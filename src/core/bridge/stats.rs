use std::sync::atomic::{AtomicU64, Ordering};

/// Per-call counters, logged when the bridge closes.
#[derive(Debug, Default)]
pub struct BridgeStats {
    events: AtomicU64,
    inbound_chunks: AtomicU64,
    outbound_chunks: AtomicU64,
    interruptions: AtomicU64,
    flushed_chunks: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events: u64,
    pub inbound_chunks: u64,
    pub outbound_chunks: u64,
    pub interruptions: u64,
    pub flushed_chunks: u64,
}

impl BridgeStats {
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inbound(&self) {
        self.inbound_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound(&self) {
        self.outbound_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self, flushed: usize) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
        self.flushed_chunks
            .fetch_add(flushed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            inbound_chunks: self.inbound_chunks.load(Ordering::Relaxed),
            outbound_chunks: self.outbound_chunks.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            flushed_chunks: self.flushed_chunks.load(Ordering::Relaxed),
        }
    }
}
