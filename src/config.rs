//! Shaping configuration: the value type, the preset table and the store.
//!
//! [`RateLimitConfig`] is an immutable value describing one network condition:
//! an enabled flag, download/upload caps in Kbps, a flat latency and a packet
//! loss percentage. Values are **clamped** to documented bounds when they
//! enter the store rather than rejected — this engine is a debugging aid, not
//! a hard API boundary.
//!
//! [`ConfigStore`] holds the current config as an atomically swapped
//! snapshot. Readers take one snapshot at the start of handling a request and
//! keep it for the lifetime of that request, even if the store is replaced
//! mid-flight; an in-flight stream is never reconfigured.
//!
//! ## Presets
//! ```
//! use netshaper::config::{ConfigStore, Preset};
//!
//! let store = ConfigStore::default();
//! store.apply_preset(Preset::TwoG);
//!
//! let cfg = store.get();
//! assert!(cfg.enabled);
//! assert_eq!(cfg.preset, Some(Preset::TwoG));
//! assert_eq!(cfg.download_kbps, 250);
//! ```
//!
//! ## Observation
//! ```
//! use netshaper::config::{ConfigStore, RateLimitConfig};
//!
//! let store = ConfigStore::default();
//! let mut updates = store.subscribe();
//! store.set(RateLimitConfig::custom(800, 400, 200, 0.0));
//! assert_eq!(updates.borrow_and_update().download_kbps, 800);
//! ```
use std::time::Duration;

use tokio::sync::watch;

/// Upper bound for a nonzero speed cap, in Kbps. `0` stays `0` (unlimited).
pub const MAX_SPEED_KBPS: u32 = 100_000;

/// Upper bound for injected latency, in milliseconds.
pub const MAX_LATENCY_MS: u64 = 5_000;

/// A named bundle of speed/latency/loss values representing a known network
/// class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Wifi,
    Lte,
    ThreeG,
    TwoG,
    Edge,
    Offline,
}

impl Preset {
    /// All presets, in descending order of quality.
    pub const ALL: [Preset; 6] = [
        Preset::Wifi,
        Preset::Lte,
        Preset::ThreeG,
        Preset::TwoG,
        Preset::Edge,
        Preset::Offline,
    ];

    /// Resolves the preset to its configuration values, enabled.
    pub fn config(self) -> RateLimitConfig {
        let (download_kbps, upload_kbps, latency_ms, loss_percent) = match self {
            Preset::Wifi => (30_000, 15_000, 5, 0.0),
            Preset::Lte => (12_000, 6_000, 50, 0.0),
            Preset::ThreeG => (1_500, 750, 200, 0.0),
            Preset::TwoG => (250, 50, 650, 2.0),
            Preset::Edge => (240, 200, 400, 1.0),
            // Offline does not bother with caps; every exchange is dropped.
            Preset::Offline => (0, 0, 0, 100.0),
        };

        RateLimitConfig {
            enabled: true,
            download_kbps,
            upload_kbps,
            latency_ms,
            loss_percent,
            preset: Some(self),
        }
    }
}

/// One immutable network-condition snapshot.
///
/// The numeric fields are always the source of truth for computation;
/// `preset` only records which table entry, if any, they were derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Master switch. When `false` the engine is fully transparent.
    pub enabled: bool,
    /// Download cap in Kbps. `0` means unlimited.
    pub download_kbps: u32,
    /// Upload cap in Kbps. `0` means unlimited.
    pub upload_kbps: u32,
    /// Flat per-exchange latency, in milliseconds.
    pub latency_ms: u64,
    /// Chance in `[0, 100]` that an exchange is dropped outright.
    pub loss_percent: f64,
    /// The preset these values were derived from, if any.
    pub preset: Option<Preset>,
}

impl Default for RateLimitConfig {
    /// Disabled, unlimited, lossless.
    fn default() -> Self {
        Self {
            enabled: false,
            download_kbps: 0,
            upload_kbps: 0,
            latency_ms: 0,
            loss_percent: 0.0,
            preset: None,
        }
    }
}

impl RateLimitConfig {
    /// An enabled config from explicit numeric values, clamped to bounds.
    ///
    /// `preset` is `None`: custom values are not a named network class.
    pub fn custom(download_kbps: u32, upload_kbps: u32, latency_ms: u64, loss_percent: f64) -> Self {
        Self {
            enabled: true,
            download_kbps,
            upload_kbps,
            latency_ms,
            loss_percent,
            preset: None,
        }
        .clamped()
    }

    /// Returns a copy with every field forced into its documented bounds.
    ///
    /// Nonzero speeds clamp to [`MAX_SPEED_KBPS`] (`0` stays unlimited),
    /// latency to [`MAX_LATENCY_MS`], loss to `[0, 100]` with NaN treated as
    /// `0`.
    pub fn clamped(mut self) -> Self {
        self.download_kbps = self.download_kbps.min(MAX_SPEED_KBPS);
        self.upload_kbps = self.upload_kbps.min(MAX_SPEED_KBPS);
        self.latency_ms = self.latency_ms.min(MAX_LATENCY_MS);
        self.loss_percent = match self.loss_percent {
            x if x.is_nan() => 0.0, // handle NaN explicitly
            x => x.clamp(0.0, 100.0),
        };
        self
    }

    /// Injected latency as a [`Duration`].
    #[inline]
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Precomputed drop threshold in `[0, u64::MAX]`.
    ///
    /// A uniform `u64` draw triggers a drop iff it is strictly less than this
    /// value; `u64::MAX` is reserved for the certain-loss case and is handled
    /// by the caller without a draw.
    pub(crate) fn loss_threshold(&self) -> u64 {
        let p = self.loss_percent;
        if p >= 100.0 {
            return u64::MAX;
        }
        if p <= 0.0 || p.is_nan() {
            return 0;
        }
        ((p / 100.0) * u64::MAX as f64) as u64
    }
}

/// The current configuration as an atomically swapped snapshot.
///
/// `get` is non-blocking and always returns the latest committed value; `set`
/// replaces the value wholesale, so no reader ever observes fields from two
/// different `set` calls. Backed by a [`watch`] slot, which also provides the
/// subscription channel used by display layers.
#[derive(Debug)]
pub struct ConfigStore {
    slot: watch::Sender<RateLimitConfig>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl ConfigStore {
    /// Creates a store holding `initial` (clamped).
    pub fn new(initial: RateLimitConfig) -> Self {
        Self {
            slot: watch::Sender::new(initial.clamped()),
        }
    }

    /// The latest committed configuration.
    pub fn get(&self) -> RateLimitConfig {
        *self.slot.borrow()
    }

    /// Atomically replaces the configuration (clamped), visible to subsequent
    /// [`get`](Self::get) calls on any thread.
    pub fn set(&self, config: RateLimitConfig) {
        self.slot.send_replace(config.clamped());
    }

    /// Resolves `preset` from the static table and replaces the
    /// configuration with it.
    pub fn apply_preset(&self, preset: Preset) {
        self.set(preset.config());
    }

    /// A receiver that observes every subsequent replacement.
    pub fn subscribe(&self) -> watch::Receiver<RateLimitConfig> {
        self.slot.subscribe()
    }
}
