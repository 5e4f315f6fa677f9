//! Network condition simulation for async request pipelines.
//!
//! `netshaper` sits in the request/response path of an HTTP-like client and
//! deterministically degrades network quality — injecting latency, capping
//! upload/download throughput and dropping exchanges at a configured loss
//! rate — while exposing live statistics. It exists so that client
//! developers can exercise failure and slow-network paths without a real
//! constrained network.
//!
//! The engine imposes no scheduler and owns no transport: each exchange runs
//! on whatever task the surrounding pipeline gives it, and the only
//! suspension points are the awaited latency and pacing timers. Bytes and
//! chunk boundaries are never altered, only their timing.
//!
//! ## Quick start
//! ```no_run
//! use netshaper::{Body, Preset, Request, Response, Shaper};
//! use std::io;
//!
//! # async fn demo() -> io::Result<()> {
//! let shaper = Shaper::new();
//! shaper.apply_preset(Preset::ThreeG); // 1.5 Mbps down, 200 ms latency
//!
//! let interceptor = shaper.interceptor();
//! let response = interceptor
//!     .intercept(Request::new("GET /big-file"), |request| async move {
//!         // hand the request to the real transport here
//!         # let _ = request;
//!         # Ok(Response::with_body((), Body::full(&b"..."[..])))
//!     })
//!     .await?; // fails with a simulated-loss error when dropped
//!
//! let body = response.body.expect("shaped body").collect().await?;
//! println!("read {} bytes under 3G conditions", body.len());
//! println!("{:?}", shaper.stats());
//! # Ok(()) }
//! ```
//!
//! ## Pieces
//! - [`config`] — the [`RateLimitConfig`] snapshot value, the [`Preset`]
//!   table and the atomically swapped [`ConfigStore`].
//! - [`stats`] — lock-free counters behind [`StatsRecorder`], snapshotted as
//!   [`ThrottleStats`].
//! - [`pacer`] — the pure bandwidth math.
//! - [`faults`] — per-exchange latency injection and loss draws, seedable
//!   for deterministic tests.
//! - [`throttle`] — [`ThrottledReader`]/[`ThrottledWriter`], the transparent
//!   per-chunk pacing wrappers.
//! - [`interceptor`] — the middleware adapter gluing the above together,
//!   once per exchange.
//! - [`io`] — extension traits for pacing raw streams directly.
//!
//! ## Simplifications, by design
//! - Streams pace independently against their own byte counters; concurrent
//!   transfers do not share a bandwidth budget.
//! - Loss draws are independent per exchange; there is no burst-loss model.
//! - Latency is a flat per-exchange value, not a jitter distribution.

pub mod config;
pub mod faults;
pub mod interceptor;
pub mod io;
pub mod pacer;
pub mod shaper;
pub mod stats;
pub mod throttle;

pub use config::{ConfigStore, Preset, RateLimitConfig};
pub use interceptor::{Body, Interceptor, Request, Response, SimulatedLossError, SIMULATED_LOSS};
pub use shaper::Shaper;
pub use stats::{StatsRecorder, ThrottleStats};
pub use throttle::{ThrottledReader, ThrottledWriter};
