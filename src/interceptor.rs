//! The middleware adapter: one call per request/response exchange.
//!
//! [`Interceptor::intercept`] is the engine's single entry point on the
//! request path. It reads one configuration snapshot, applies latency and the
//! loss check in that fixed order, shapes the outbound body, forwards the
//! exchange through the caller-supplied `proceed` closure, and shapes the
//! response body on the way back. The snapshot is held for the lifetime of
//! the exchange: reconfiguring the engine mid-flight never touches a request
//! that has already started.
//!
//! Request metadata (URL, method, headers, whatever the enclosing pipeline
//! uses) is opaque to the engine and passed through untouched as the generic
//! `M` parameter; only the optional [`Body`] is inspected.
//!
//! ## Loss semantics
//! A dropped exchange fails with [`SIMULATED_LOSS`] **before** `proceed` is
//! invoked — it mirrors a dropped connection, not a degraded one, and leaves
//! no partial side effects downstream. The error is surfaced as
//! `io::Error::other(SIMULATED_LOSS)` so callers can tell it apart from real
//! transport failures:
//!
//! ```no_run
//! # use netshaper::interceptor::SimulatedLossError;
//! # fn classify(err: &std::io::Error) -> bool {
//! err.get_ref()
//!     .is_some_and(|e| e.downcast_ref::<SimulatedLossError>().is_some())
//! # }
//! ```
//!
//! Errors from `proceed` itself, and from the wrapped streams, propagate
//! unchanged.
use std::{fmt, future::Future, io, sync::Arc};

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::watch,
    time::sleep,
};
use tracing::debug;

use crate::{
    config::RateLimitConfig,
    faults::FaultInjector,
    pacer,
    stats::StatsRecorder,
    throttle::ThrottledReader,
};

/// Marker error for an exchange dropped by the loss simulation.
///
/// Always recoverable by the caller's own retry policy; never indicates an
/// engine malfunction.
#[derive(Debug, Copy, Clone, Error)]
#[error("exchange dropped by simulated packet loss")]
pub struct SimulatedLossError;

/// Singleton instance used in `io::Error::other(SIMULATED_LOSS)`.
pub const SIMULATED_LOSS: SimulatedLossError = SimulatedLossError;

/// An exchange payload: either fully buffered with a known length, or a
/// streaming byte source read incrementally.
pub enum Body {
    /// A bounded payload, available up front. Shaped with a one-shot delay.
    Full(Bytes),
    /// An incrementally produced byte stream. Shaped by wrapping each read.
    Streaming(Box<dyn AsyncRead + Send + Unpin>),
}

impl Body {
    /// A buffered body from anything byte-like.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Body::Full(bytes.into())
    }

    /// A streaming body from any readable byte source.
    pub fn streaming(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Body::Streaming(Box::new(reader))
    }

    /// The payload length, when known up front.
    pub fn len(&self) -> Option<usize> {
        match self {
            Body::Full(bytes) => Some(bytes.len()),
            Body::Streaming(_) => None,
        }
    }

    /// Whether the body is known to be empty.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Reads the body to completion, pacing included for a wrapped stream.
    pub async fn collect(self) -> io::Result<Bytes> {
        match self {
            Body::Full(bytes) => Ok(bytes),
            Body::Streaming(mut reader) => {
                let mut out = Vec::new();
                reader.read_to_end(&mut out).await?;
                Ok(out.into())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Body::Streaming(_) => f.debug_tuple("Streaming").finish(),
        }
    }
}

/// A request descriptor: opaque metadata plus an optional outbound body.
#[derive(Debug)]
pub struct Request<M> {
    /// Passed through the engine untouched.
    pub meta: M,
    /// Upload payload, shaped at the configured upload rate.
    pub body: Option<Body>,
}

impl<M> Request<M> {
    /// A bodiless request.
    pub fn new(meta: M) -> Self {
        Self { meta, body: None }
    }

    /// A request carrying an upload payload.
    pub fn with_body(meta: M, body: Body) -> Self {
        Self {
            meta,
            body: Some(body),
        }
    }
}

/// A response descriptor: opaque metadata plus an optional readable body.
#[derive(Debug)]
pub struct Response<M> {
    /// Passed through the engine untouched.
    pub meta: M,
    /// Download payload, shaped at the configured download rate.
    pub body: Option<Body>,
}

impl<M> Response<M> {
    /// A bodiless response.
    pub fn new(meta: M) -> Self {
        Self { meta, body: None }
    }

    /// A response carrying a download payload.
    pub fn with_body(meta: M, body: Body) -> Self {
        Self {
            meta,
            body: Some(body),
        }
    }
}

/// The per-exchange middleware handle.
///
/// Cheap to clone; clones observe the same configuration store and feed the
/// same statistics. Obtain one from
/// [`Shaper::interceptor`](crate::shaper::Shaper::interceptor).
#[derive(Debug, Clone)]
pub struct Interceptor {
    config: watch::Receiver<RateLimitConfig>,
    stats: Arc<StatsRecorder>,
    faults: Arc<FaultInjector>,
}

impl Interceptor {
    pub(crate) fn new(
        config: watch::Receiver<RateLimitConfig>,
        stats: Arc<StatsRecorder>,
        faults: Arc<FaultInjector>,
    ) -> Self {
        Self {
            config,
            stats,
            faults,
        }
    }

    /// Runs one exchange through the engine.
    ///
    /// `proceed` performs the real exchange — it is the rest of the pipeline.
    /// With the engine disabled this is a pure passthrough: no latency, no
    /// loss check, no wrapping, no statistics. Otherwise latency is injected
    /// first, then the loss check runs (a drop still costs the latency), and
    /// only then is the exchange forwarded with its bodies shaped.
    pub async fn intercept<M, N, F, Fut>(
        &self,
        mut request: Request<M>,
        proceed: F,
    ) -> io::Result<Response<N>>
    where
        F: FnOnce(Request<M>) -> Fut,
        Fut: Future<Output = io::Result<Response<N>>>,
    {
        let config = *self.config.borrow();
        if !config.enabled {
            return proceed(request).await;
        }

        self.faults.inject_latency(&config).await;

        if self.faults.should_drop(&config) {
            return Err(io::Error::other(SIMULATED_LOSS));
        }

        if let Some(body) = request.body.take() {
            request.body = Some(self.shape_body(body, config.upload_kbps).await);
        }

        let mut response = proceed(request).await?;

        if let Some(body) = response.body.take() {
            response.body = Some(self.shape_body(body, config.download_kbps).await);
        }

        Ok(response)
    }

    /// Applies the rate cap to one body, in either direction.
    ///
    /// A buffered body takes its whole delay up front (the payload is bounded
    /// and fully available); a streaming body is wrapped so each chunk is
    /// paced as it is read.
    async fn shape_body(&self, body: Body, rate_kbps: u32) -> Body {
        if rate_kbps == 0 {
            return body;
        }

        match body {
            Body::Full(bytes) => {
                let delay = pacer::expected_transfer_time(bytes.len() as u64, rate_kbps);
                if !delay.is_zero() {
                    debug!(
                        bytes = bytes.len(),
                        rate_kbps,
                        delay_ms = delay.as_millis() as u64,
                        "pacing buffered body"
                    );
                    sleep(delay).await;
                    self.stats.record_delay(delay);
                }
                self.stats.record_bytes(bytes.len() as u64);
                Body::Full(bytes)
            }
            Body::Streaming(reader) => {
                debug!(rate_kbps, "wrapping streaming body");
                Body::Streaming(Box::new(ThrottledReader::new(
                    reader,
                    rate_kbps,
                    self.stats.clone(),
                )))
            }
        }
    }
}
