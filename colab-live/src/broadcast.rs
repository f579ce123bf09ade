//! Fan-out of rendered fragments to every connection of a session.
//!
//! One tokio broadcast channel per session. A payload is rendered once and
//! shared as `Arc<str>`; each connection owns a receiver buffering up to
//! `capacity` payloads. A receiver that falls further behind is lagged and
//! skips ahead rather than stalling the sender.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// A rendered fragment, shared by every receiver.
pub type Payload = Arc<str>;

/// Snapshot of fan-out counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutStats {
    pub payloads_sent: u64,
    pub payloads_lagged: u64,
    pub receivers: usize,
}

#[derive(Default)]
struct AtomicFanoutStats {
    payloads_sent: AtomicU64,
    payloads_lagged: AtomicU64,
}

pub struct Fanout {
    sender: broadcast::Sender<Payload>,
    capacity: usize,
    stats: AtomicFanoutStats,
}

impl Fanout {
    /// Create a fan-out buffering `capacity` payloads per receiver
    /// (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            stats: AtomicFanoutStats::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Payload> {
        self.sender.subscribe()
    }

    /// Send to every current receiver. Returns how many received it;
    /// zero receivers is not an error.
    pub fn send(&self, payload: impl Into<Payload>) -> usize {
        let count = self.sender.send(payload.into()).unwrap_or(0);
        self.stats.payloads_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record payloads a lagging receiver skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.stats
            .payloads_lagged
            .fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            payloads_sent: self.stats.payloads_sent.load(Ordering::Relaxed),
            payloads_lagged: self.stats.payloads_lagged.load(Ordering::Relaxed),
            receivers: self.sender.receiver_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
