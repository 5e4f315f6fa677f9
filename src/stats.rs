//! Live statistics for the shaping pipeline.
//!
//! [`StatsRecorder`] is a lock-free set of four independent counters shared by
//! the fault injector, the throttled stream wrappers and the interceptor.
//! Incrementing never blocks and never fails; a failure to record must never
//! fail a request. [`StatsRecorder::snapshot`] produces an immutable
//! [`ThrottleStats`] copy for display.
//!
//! The counters are **independently meaningful**: a reader may observe some
//! increments applied and others not yet applied, but never a partially
//! updated single counter. Injected delay is accumulated at microsecond
//! resolution internally so that sub-millisecond pacing sleeps are not lost
//! to rounding, and reported as whole milliseconds.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

/// Point-in-time snapshot of the shaping counters.
///
/// Monotonically non-decreasing between [`StatsRecorder::reset`] calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThrottleStats {
    /// Number of times an exchange or a stream chunk was actually delayed.
    pub requests_throttled: u64,
    /// Total injected delay (latency + pacing sleeps), in milliseconds.
    pub total_delay_ms: u64,
    /// Number of exchanges dropped by the loss simulation.
    pub packets_dropped: u64,
    /// Bytes that passed through a throttled stream.
    pub bytes_throttled: u64,
}

/// Shareable, lock-free counter set.
///
/// Cheap to clone via [`Arc`]; every wrapper spawned by the same engine holds
/// the same recorder. All increments use relaxed ordering — the counters do
/// not order anything besides themselves.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    requests_throttled: AtomicU64,
    delay_micros: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_throttled: AtomicU64,
}

impl StatsRecorder {
    /// Creates a zeroed recorder behind an [`Arc`].
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one completed delay (latency injection or a pacing sleep).
    ///
    /// Adds the duration to the delay total and counts one throttled request.
    pub fn record_delay(&self, delay: Duration) {
        self.delay_micros
            .fetch_add(delay.as_micros() as u64, Ordering::Relaxed);
        self.requests_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one exchange dropped by the loss simulation.
    pub fn record_drop(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `n` bytes moved through a throttled stream.
    pub fn record_bytes(&self, n: u64) {
        self.bytes_throttled.fetch_add(n, Ordering::Relaxed);
    }

    /// Builds a point-in-time copy of all four counters.
    pub fn snapshot(&self) -> ThrottleStats {
        ThrottleStats {
            requests_throttled: self.requests_throttled.load(Ordering::Relaxed),
            total_delay_ms: self.delay_micros.load(Ordering::Relaxed) / 1_000,
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_throttled: self.bytes_throttled.load(Ordering::Relaxed),
        }
    }

    /// Zeroes all four counters. After this returns, no earlier increment is
    /// visible in subsequent snapshots.
    pub fn reset(&self) {
        self.requests_throttled.store(0, Ordering::Relaxed);
        self.delay_micros.store(0, Ordering::Relaxed);
        self.packets_dropped.store(0, Ordering::Relaxed);
        self.bytes_throttled.store(0, Ordering::Relaxed);
    }
}
