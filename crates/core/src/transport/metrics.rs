//! Counters shared by all transports of one controller.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportMetrics {
    malformed_events: AtomicU64,
    duplicate_events: AtomicU64,
    fallbacks: AtomicU64,
    failed_polls: AtomicU64,
}

/// Point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Events dropped because their payload could not be decoded.
    pub malformed_events: u64,
    /// Events dropped because they had already been delivered.
    pub duplicate_events: u64,
    /// Switches from a push transport to polling.
    pub fallbacks: u64,
    pub failed_polls: u64,
}

impl TransportMetrics {
    pub fn record_malformed(&self) {
        self.malformed_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_poll(&self) {
        self.failed_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            malformed_events: self.malformed_events.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
        }
    }
}
