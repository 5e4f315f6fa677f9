//! Per-exchange fault injection: flat latency and probabilistic loss.
//!
//! [`FaultInjector`] makes the two per-request decisions the interceptor asks
//! for, in this fixed order:
//! - [`inject_latency`](FaultInjector::inject_latency) suspends the calling
//!   task for the configured latency and records the delay;
//! - [`should_drop`](FaultInjector::should_drop) rolls one independent
//!   uniform draw against the configured loss chance.
//!
//! Draws are not correlated across exchanges — there is no burst-loss
//! modeling. The hot path compares a random `u64` against a precomputed
//! threshold instead of doing floating-point math per draw.
//!
//! ## Deterministic testing
//! By default each draw comes from the thread-local RNG, keeping the injector
//! stateless per call. [`FaultInjector::from_seed`] and
//! [`FaultInjector::from_rng`] install a seeded [`SmallRng`] instead, so loss
//! behavior can be replayed exactly in tests.
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::{rngs::SmallRng, RngCore, SeedableRng};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::{config::RateLimitConfig, stats::StatsRecorder};

enum Entropy {
    Thread,
    Seeded(Mutex<SmallRng>),
}

/// Decides, per exchange, whether to delay and whether to drop.
///
/// Stateless per call aside from the optional seeded RNG; safe to share
/// across any number of concurrent exchanges.
pub struct FaultInjector {
    stats: Arc<StatsRecorder>,
    entropy: Entropy,
}

impl FaultInjector {
    /// An injector drawing from the thread-local RNG.
    pub fn new(stats: Arc<StatsRecorder>) -> Self {
        Self {
            stats,
            entropy: Entropy::Thread,
        }
    }

    /// An injector with a deterministic, replayable draw sequence.
    pub fn from_seed(stats: Arc<StatsRecorder>, seed: [u8; 32]) -> Self {
        Self {
            stats,
            entropy: Entropy::Seeded(Mutex::new(SmallRng::from_seed(seed))),
        }
    }

    /// An injector seeded from a caller-supplied RNG.
    pub fn from_rng(stats: Arc<StatsRecorder>, rng: &mut impl RngCore) -> Self {
        Self {
            stats,
            entropy: Entropy::Seeded(Mutex::new(SmallRng::from_rng(rng))),
        }
    }

    /// Suspends the calling task for `config.latency_ms` and records it.
    ///
    /// The delay is recorded only after the sleep completes: a cancelled
    /// sleep must not count its unslept remainder.
    pub async fn inject_latency(&self, config: &RateLimitConfig) {
        let delay = config.latency();
        if delay.is_zero() {
            return;
        }

        debug!(latency_ms = config.latency_ms, "injecting latency");
        sleep(delay).await;
        self.stats.record_delay(delay);
    }

    /// Rolls one uniform draw; `true` means the exchange is dropped.
    ///
    /// `loss_percent == 0` never drops, `loss_percent == 100` always drops.
    /// A drop is counted immediately.
    pub fn should_drop(&self, config: &RateLimitConfig) -> bool {
        let dropped = match config.loss_threshold() {
            0 => false,
            u64::MAX => true,
            threshold => self.draw() < threshold,
        };

        if dropped {
            self.stats.record_drop();
            info!(loss_percent = config.loss_percent, "simulated packet loss");
        }
        dropped
    }

    fn draw(&self) -> u64 {
        match &self.entropy {
            Entropy::Thread => rand::rng().next_u64(),
            Entropy::Seeded(rng) => rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next_u64(),
        }
    }
}

impl fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entropy = match &self.entropy {
            Entropy::Thread => "thread",
            Entropy::Seeded(_) => "seeded",
        };
        f.debug_struct("FaultInjector")
            .field("entropy", &entropy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{timeout, Instant};

    fn config_with_loss(loss_percent: f64) -> RateLimitConfig {
        RateLimitConfig::custom(0, 0, 0, loss_percent)
    }

    #[test]
    fn zero_loss_never_drops() {
        let stats = StatsRecorder::new();
        let faults = FaultInjector::new(stats.clone());
        let cfg = config_with_loss(0.0);

        for _ in 0..10_000 {
            assert!(!faults.should_drop(&cfg));
        }
        assert_eq!(stats.snapshot().packets_dropped, 0);
    }

    #[test]
    fn certain_loss_always_drops() {
        let stats = StatsRecorder::new();
        let faults = FaultInjector::new(stats.clone());
        let cfg = config_with_loss(100.0);

        for _ in 0..10_000 {
            assert!(faults.should_drop(&cfg));
        }
        assert_eq!(stats.snapshot().packets_dropped, 10_000);
    }

    #[test]
    fn seeded_injectors_replay_the_same_sequence() {
        let cfg = config_with_loss(50.0);
        let a = FaultInjector::from_seed(StatsRecorder::new(), [7u8; 32]);
        let b = FaultInjector::from_seed(StatsRecorder::new(), [7u8; 32]);

        let sequence_a: Vec<bool> = (0..256).map(|_| a.should_drop(&cfg)).collect();
        let sequence_b: Vec<bool> = (0..256).map(|_| b.should_drop(&cfg)).collect();
        assert_eq!(sequence_a, sequence_b);
        // A 50% knob that never (or always) fires in 256 draws is broken.
        assert!(sequence_a.iter().any(|&d| d));
        assert!(sequence_a.iter().any(|&d| !d));
    }

    #[test]
    fn half_loss_rate_is_roughly_half() {
        let cfg = config_with_loss(50.0);
        let faults = FaultInjector::from_seed(StatsRecorder::new(), [3u8; 32]);

        let trials = 20_000;
        let drops = (0..trials).filter(|_| faults.should_drop(&cfg)).count();
        let ratio = drops as f64 / trials as f64;
        assert!((0.45..=0.55).contains(&ratio), "drop ratio {ratio}");
    }

    #[tokio::test(start_paused = true)]
    async fn latency_suspends_and_records() {
        let stats = StatsRecorder::new();
        let faults = FaultInjector::new(stats.clone());
        let cfg = RateLimitConfig::custom(0, 0, 200, 0.0);

        let start = Instant::now();
        faults.inject_latency(&cfg).await;
        assert!(start.elapsed() >= Duration::from_millis(200));

        let snap = stats.snapshot();
        assert_eq!(snap.total_delay_ms, 200);
        assert_eq!(snap.requests_throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_latency_is_a_fast_path() {
        let stats = StatsRecorder::new();
        let faults = FaultInjector::new(stats.clone());
        let cfg = RateLimitConfig::custom(0, 0, 0, 0.0);

        let start = Instant::now();
        faults.inject_latency(&cfg).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(stats.snapshot().requests_throttled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_latency_records_nothing() {
        let stats = StatsRecorder::new();
        let faults = FaultInjector::new(stats.clone());
        let cfg = RateLimitConfig::custom(0, 0, 500, 0.0);

        let cancelled = timeout(Duration::from_millis(100), faults.inject_latency(&cfg)).await;
        assert!(cancelled.is_err());

        let snap = stats.snapshot();
        assert_eq!(snap.total_delay_ms, 0);
        assert_eq!(snap.requests_throttled, 0);
    }
}
