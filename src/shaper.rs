//! The engine facade: configuration surface plus interceptor access.
//!
//! [`Shaper`] bundles the configuration store, the statistics recorder and
//! the fault injector behind one cheaply cloneable handle. A UI or config
//! layer drives it (`set_config`, `apply_preset`, `set_custom`,
//! `clear_stats`, `subscribe`); the transport layer asks it for an
//! [`Interceptor`] and runs every exchange through
//! [`Interceptor::intercept`].
//!
//! ```no_run
//! use netshaper::{Body, Preset, Request, Shaper};
//! use std::io;
//!
//! # async fn demo() -> io::Result<()> {
//! let shaper = Shaper::new();
//! shaper.apply_preset(Preset::ThreeG);
//!
//! let interceptor = shaper.interceptor();
//! let response = interceptor
//!     .intercept(Request::new("GET /file"), |request| async move {
//!         // ... the real exchange ...
//!         # let _ = request;
//!         # Ok(netshaper::Response::with_body((), Body::full(&b"ok"[..])))
//!     })
//!     .await?;
//!
//! let body = response.body.expect("shaped body").collect().await?;
//! println!("{} bytes, stats: {:?}", body.len(), shaper.stats());
//! # Ok(()) }
//! ```
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::watch;
use tracing::info;

use crate::{
    config::{ConfigStore, Preset, RateLimitConfig},
    faults::FaultInjector,
    interceptor::Interceptor,
    stats::{StatsRecorder, ThrottleStats},
};

/// The network condition simulation engine.
///
/// Clones share the same store, counters and fault injector. Each stream
/// paces independently against its own byte counter — the engine simulates
/// uncontended bandwidth per request, not cross-request fair-share queueing.
#[derive(Debug, Clone)]
pub struct Shaper {
    store: Arc<ConfigStore>,
    stats: Arc<StatsRecorder>,
    faults: Arc<FaultInjector>,
}

impl Default for Shaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Shaper {
    /// An engine starting disabled and unlimited.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// An engine starting from `config`.
    pub fn with_config(config: RateLimitConfig) -> Self {
        let stats = StatsRecorder::new();
        Self {
            store: Arc::new(ConfigStore::new(config)),
            faults: Arc::new(FaultInjector::new(stats.clone())),
            stats,
        }
    }

    /// An engine whose loss draws replay deterministically from `seed`.
    pub fn from_seed(config: RateLimitConfig, seed: [u8; 32]) -> Self {
        let stats = StatsRecorder::new();
        Self {
            store: Arc::new(ConfigStore::new(config)),
            faults: Arc::new(FaultInjector::from_seed(stats.clone(), seed)),
            stats,
        }
    }

    /// An engine whose loss draws are seeded from a caller-supplied RNG.
    pub fn from_rng(config: RateLimitConfig, rng: &mut impl RngCore) -> Self {
        let stats = StatsRecorder::new();
        Self {
            store: Arc::new(ConfigStore::new(config)),
            faults: Arc::new(FaultInjector::from_rng(stats.clone(), rng)),
            stats,
        }
    }

    /// Atomically replaces the whole configuration (clamped).
    pub fn set_config(&self, config: RateLimitConfig) {
        info!(?config, "replacing shaping config");
        self.store.set(config);
    }

    /// Replaces the configuration with a named preset.
    pub fn apply_preset(&self, preset: Preset) {
        info!(?preset, "applying preset");
        self.store.apply_preset(preset);
    }

    /// Replaces the configuration with explicit custom values, enabled.
    pub fn set_custom(
        &self,
        download_kbps: u32,
        upload_kbps: u32,
        latency_ms: u64,
        loss_percent: f64,
    ) {
        self.set_config(RateLimitConfig::custom(
            download_kbps,
            upload_kbps,
            latency_ms,
            loss_percent,
        ));
    }

    /// Flips the master switch, keeping the numeric fields.
    pub fn set_enabled(&self, enabled: bool) {
        let mut config = self.store.get();
        config.enabled = enabled;
        self.store.set(config);
    }

    /// The latest committed configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.store.get()
    }

    /// A receiver observing every configuration replacement.
    pub fn subscribe(&self) -> watch::Receiver<RateLimitConfig> {
        self.store.subscribe()
    }

    /// A point-in-time copy of the shaping counters.
    pub fn stats(&self) -> ThrottleStats {
        self.stats.snapshot()
    }

    /// Zeroes all four counters.
    pub fn clear_stats(&self) {
        self.stats.reset();
    }

    /// A middleware handle sharing this engine's state.
    pub fn interceptor(&self) -> Interceptor {
        Interceptor::new(self.store.subscribe(), self.stats.clone(), self.faults.clone())
    }
}
