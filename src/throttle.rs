//! Bandwidth-pacing wrappers for async byte streams.
//!
//! Two adapters pace I/O to a **kilobits-per-second** cap without altering
//! the bytes or chunk boundaries the caller observes:
//! - [`ThrottledReader`] paces reads from an [`AsyncRead`] source (download
//!   direction).
//! - [`ThrottledWriter`] paces writes to an [`AsyncWrite`] sink (upload
//!   direction).
//!
//! A rate of `0` disables pacing entirely (fast path). Every wrapper records
//! the bytes it moves and the sleeps it serves into a shared
//! [`StatsRecorder`].
//!
//! ## Pacing model
//! Each wrapper owns one ephemeral transfer state: cumulative bytes moved and
//! the wall-clock instant of the first byte. After a chunk moves, the wrapper
//! compares how long the **cumulative** count should have taken against how
//! long it actually took, and arms a sleep for the positive remainder; the
//! next poll waits the sleep out before touching the inner stream. Comparing
//! cumulative-expected against elapsed self-corrects: splitting the same
//! bytes into more reads, or pausing between reads, never changes the total
//! transfer time. End-of-stream is reported only after any armed sleep has
//! elapsed, so time-to-exhaustion respects the cap.
//!
//! Chunks are paced individually — the body is never buffered in memory, and
//! the streaming/backpressure character of the inner transport is preserved.
//! A single oversized write is bounded to one second's worth of bytes at the
//! configured rate; callers' `write_all` loops continue with the remainder.
//!
//! ## Example
//! ```no_run
//! use netshaper::stats::StatsRecorder;
//! use netshaper::throttle::ThrottledReader;
//! use tokio::io::{self, AsyncReadExt};
//! use tokio::net::TcpStream;
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let stats = StatsRecorder::new();
//! let stream = TcpStream::connect("127.0.0.1:12345").await?;
//! let mut reader = ThrottledReader::new(stream, 800, stats); // 800 Kbps
//!
//! let mut buf = vec![0u8; 8192];
//! let n = reader.read(&mut buf).await?; // paced transparently
//! # let _ = n; Ok(()) }
//! ```
//!
//! ## Under the hood
//! - The transfer clock starts at the first nonzero chunk, not at
//!   construction; a stream created long before it is first read is not
//!   credited idle time.
//! - Pacing sleeps are recorded in the statistics only once they complete: a
//!   caller that abandons the stream mid-sleep does not count the unslept
//!   remainder.
//! - I/O errors from the inner stream propagate unchanged; bytes already
//!   delivered stay delivered.
use std::{
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Duration,
};

use futures::FutureExt;
use pin_project::pin_project;
use smallvec::SmallVec;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::{sleep, Instant, Sleep},
};

use crate::{pacer, stats::StatsRecorder};

/// Inline `IoSlice` capacity for zero-allocation vectored writes in the
/// common path.
const INLINE_IOVEC: usize = 16;

/// Per-wrapper transfer state plus the armed pacing sleep.
struct Pacing {
    rate_kbps: u32,
    transferred: u64,
    started: Option<Instant>,
    sleep: Pin<Box<Sleep>>,
    pending: Option<Duration>,
}

impl Pacing {
    fn new(rate_kbps: u32) -> Self {
        Self {
            rate_kbps,
            transferred: 0,
            started: None,
            sleep: Box::pin(sleep(Duration::ZERO)),
            pending: None,
        }
    }

    #[inline]
    fn is_unlimited(&self) -> bool {
        self.rate_kbps == 0
    }

    /// Largest chunk a single write may forward: one second of budget.
    #[inline]
    fn chunk_budget(&self) -> usize {
        pacer::bytes_per_second(self.rate_kbps).max(1).min(usize::MAX as u64) as usize
    }

    /// Waits out a previously armed sleep, recording it once it completes.
    fn poll_pending(&mut self, cx: &mut Context<'_>, stats: &StatsRecorder) -> Poll<()> {
        if let Some(delay) = self.pending {
            ready!(self.sleep.poll_unpin(cx));
            stats.record_delay(delay);
            self.pending = None;
        }
        Poll::Ready(())
    }

    /// Accounts `n` freshly moved bytes and arms the remainder sleep, if any.
    fn account(&mut self, n: u64, stats: &StatsRecorder) {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.transferred += n;
        stats.record_bytes(n);

        let remainder =
            pacer::remaining_delay(self.transferred, self.rate_kbps, started.elapsed());
        if !remainder.is_zero() {
            self.sleep.as_mut().reset(Instant::now() + remainder);
            self.pending = Some(remainder);
        }
    }
}

/// A read-side pacer for download shaping.
///
/// Wraps any [`AsyncRead`] and delays successive reads so the observed
/// throughput stays at or below the configured rate. Writes are forwarded
/// unchanged when `T: AsyncWrite`.
#[pin_project]
pub struct ThrottledReader<T> {
    #[pin]
    inner: T,
    pacing: Pacing,
    stats: Arc<StatsRecorder>,
}

impl<T> ThrottledReader<T> {
    /// Wraps `inner`, pacing reads to `rate_kbps` (0 = unlimited) and
    /// recording into `stats`.
    pub fn new(inner: T, rate_kbps: u32, stats: Arc<StatsRecorder>) -> Self {
        Self {
            inner,
            pacing: Pacing::new(rate_kbps),
            stats,
        }
    }
}

impl<T: AsyncRead> AsyncRead for ThrottledReader<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();

        if this.pacing.is_unlimited() {
            return this.inner.poll_read(cx, buf);
        }

        ready!(this.pacing.poll_pending(cx, this.stats));

        let before = buf.filled().len();
        ready!(this.inner.as_mut().poll_read(cx, buf))?;
        let n = (buf.filled().len() - before) as u64;
        if n > 0 {
            this.pacing.account(n, this.stats);
        }

        Poll::Ready(Ok(()))
    }
}

impl<W: AsyncWrite> AsyncWrite for ThrottledReader<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write_vectored(cx, bufs)
    }
}

impl<T: fmt::Debug> fmt::Debug for ThrottledReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// A write-side pacer for upload shaping.
///
/// Wraps any [`AsyncWrite`] and delays successive writes so the observed
/// throughput stays at or below the configured rate. Each write forwards at
/// most one second's worth of bytes; `flush` is pass-through; `shutdown`
/// waits out any armed sleep first. Reads are forwarded unchanged when
/// `T: AsyncRead`.
#[pin_project]
pub struct ThrottledWriter<T> {
    #[pin]
    inner: T,
    pacing: Pacing,
    stats: Arc<StatsRecorder>,
}

impl<T> ThrottledWriter<T> {
    /// Wraps `inner`, pacing writes to `rate_kbps` (0 = unlimited) and
    /// recording into `stats`.
    pub fn new(inner: T, rate_kbps: u32, stats: Arc<StatsRecorder>) -> Self {
        Self {
            inner,
            pacing: Pacing::new(rate_kbps),
            stats,
        }
    }
}

impl<W: AsyncWrite> AsyncWrite for ThrottledWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();

        if this.pacing.is_unlimited() || buf.is_empty() {
            return this.inner.poll_write(cx, buf);
        }

        ready!(this.pacing.poll_pending(cx, this.stats));

        let want = buf.len().min(this.pacing.chunk_budget());
        let n = ready!(this.inner.as_mut().poll_write(cx, &buf[..want]))?;
        if n > 0 {
            this.pacing.account(n as u64, this.stats);
        }

        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();

        if !this.pacing.is_unlimited() {
            ready!(this.pacing.poll_pending(cx, this.stats));
        }
        this.inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();

        if this.pacing.is_unlimited() {
            return this.inner.poll_write_vectored(cx, bufs);
        }

        ready!(this.pacing.poll_pending(cx, this.stats));

        let total: usize = bufs.iter().map(|b| b.len()).sum();
        if total == 0 {
            return this.inner.poll_write_vectored(cx, bufs);
        }

        let budget = this.pacing.chunk_budget();
        let n = if total <= budget {
            ready!(this.inner.as_mut().poll_write_vectored(cx, bufs))?
        } else {
            // Build a budget-limited view without heap allocs in the common case.
            let mut remaining = budget;
            let mut slices: SmallVec<[io::IoSlice<'_>; INLINE_IOVEC]> = SmallVec::new();
            for s in bufs {
                if remaining == 0 {
                    break;
                }
                let take = s.len().min(remaining);
                slices.push(io::IoSlice::new(&s[..take]));
                remaining -= take;
            }
            ready!(this.inner.as_mut().poll_write_vectored(cx, &slices))?
        };

        if n > 0 {
            this.pacing.account(n as u64, this.stats);
        }
        Poll::Ready(Ok(n))
    }
}

impl<R: AsyncRead> AsyncRead for ThrottledWriter<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().inner.poll_read(cx, buf)
    }
}

impl<T: fmt::Debug> fmt::Debug for ThrottledWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::IoSlice;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::time::{self, Duration, Instant};

    /// Drains a paced reader to EOF, returning the bytes and elapsed time.
    async fn drain<R: AsyncRead + Unpin>(reader: &mut R, chunk: usize) -> (Vec<u8>, Duration) {
        let start = Instant::now();
        let mut out = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        (out, start.elapsed())
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_reader_is_pass_through_without_sleep_or_stats() {
        let (mut w, r) = duplex(256);
        let stats = StatsRecorder::new();
        let mut tr = ThrottledReader::new(r, 0, stats.clone());

        let data = vec![42u8; 64];
        let payload = data.clone();
        tokio::spawn(async move {
            let _ = w.write_all(&payload).await;
        });

        let (out, elapsed) = drain(&mut tr, 32).await;
        assert_eq!(out, data);
        assert_eq!(elapsed, Duration::ZERO, "unlimited path must not sleep");
        assert_eq!(stats.snapshot().bytes_throttled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_paces_stream_to_the_configured_rate() {
        // 800 Kbps = 100_000 B/s; 50_000 bytes should take 500 ms.
        let (mut w, r) = duplex(64 * 1024);
        let stats = StatsRecorder::new();
        let mut tr = ThrottledReader::new(r, 800, stats.clone());

        let data = vec![b'x'; 50_000];
        tokio::spawn(async move {
            let _ = w.write_all(&data).await;
        });

        let (out, elapsed) = drain(&mut tr, 8192).await;
        assert_eq!(out.len(), 50_000);
        assert!(
            elapsed >= Duration::from_millis(500),
            "elapsed {elapsed:?} < 500ms"
        );

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_throttled, 50_000);
        assert!(snap.requests_throttled >= 1);
        assert!(snap.total_delay_ms >= 400);
        assert_eq!(snap.packets_dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn total_time_is_independent_of_read_granularity() {
        // The anti-drift property: the same bytes in smaller reads must not
        // take longer, only redistribute the sleeps.
        let mut elapsed_by_chunk = Vec::new();
        for chunk in [512usize, 4096, 16 * 1024] {
            let (mut w, r) = duplex(64 * 1024);
            let mut tr = ThrottledReader::new(r, 800, StatsRecorder::new());

            let data = vec![b'y'; 25_000];
            tokio::spawn(async move {
                let _ = w.write_all(&data).await;
            });

            let (out, elapsed) = drain(&mut tr, chunk).await;
            assert_eq!(out.len(), 25_000);
            elapsed_by_chunk.push(elapsed);
        }

        // 25_000 B at 100_000 B/s = 250 ms, regardless of chunking.
        for elapsed in elapsed_by_chunk {
            assert!(
                elapsed >= Duration::from_millis(250),
                "elapsed {elapsed:?} < 250ms"
            );
            assert!(
                elapsed <= Duration::from_millis(260),
                "elapsed {elapsed:?} drifted past expected + slop"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_caller_is_not_paced_twice() {
        // A caller that pauses between reads is already behind schedule; the
        // wrapper must not add sleeps on top.
        let (mut w, r) = duplex(64 * 1024);
        let mut tr = ThrottledReader::new(r, 800, StatsRecorder::new());

        let data = vec![b'z'; 20_000];
        tokio::spawn(async move {
            let _ = w.write_all(&data).await;
        });

        let start = Instant::now();
        let mut buf = vec![0u8; 10_000];
        tr.read_exact(&mut buf).await.unwrap();

        // Pause well past the whole transfer's expected time (200 ms).
        time::sleep(Duration::from_millis(400)).await;

        tr.read_exact(&mut buf).await.unwrap();
        assert_eq!(tr.read(&mut buf).await.unwrap(), 0);

        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_millis(450),
            "wrapper slept while already behind schedule: {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_sleep_is_not_recorded() {
        let (mut w, r) = duplex(64 * 1024);
        let stats = StatsRecorder::new();
        let mut tr = ThrottledReader::new(r, 8, stats.clone()); // 1000 B/s

        w.write_all(&[b'a'; 1000]).await.unwrap();

        let mut buf = vec![0u8; 1000];
        tr.read_exact(&mut buf).await.unwrap();
        drop(tr); // armed ~1s sleep never completes

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_throttled, 1000);
        assert_eq!(snap.total_delay_ms, 0);
        assert_eq!(snap.requests_throttled, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_propagates_inner_errors_unchanged() {
        struct FailingReader;

        impl AsyncRead for FailingReader {
            fn poll_read(
                self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                _buf: &mut ReadBuf<'_>,
            ) -> Poll<io::Result<()>> {
                Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "boom")))
            }
        }

        let mut tr = ThrottledReader::new(FailingReader, 800, StatsRecorder::new());
        let mut buf = [0u8; 16];
        let err = tr.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_paces_to_the_configured_rate() {
        // 400 Kbps = 50_000 B/s; 25_000 bytes should take 500 ms.
        let (w, mut r) = duplex(64 * 1024);
        let stats = StatsRecorder::new();
        let mut tw = ThrottledWriter::new(w, 400, stats.clone());

        let drainer = tokio::spawn(async move {
            let mut sink = Vec::new();
            r.read_to_end(&mut sink).await.unwrap();
            sink
        });

        let start = Instant::now();
        tw.write_all(&vec![b'u'; 25_000]).await.unwrap();
        tw.shutdown().await.unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(500),
            "elapsed {elapsed:?} < 500ms"
        );
        assert_eq!(drainer.await.unwrap().len(), 25_000);
        assert_eq!(stats.snapshot().bytes_throttled, 25_000);
    }

    #[tokio::test(start_paused = true)]
    async fn single_write_is_bounded_to_one_second_of_budget() {
        let (w, _r) = duplex(64 * 1024);
        let mut tw = ThrottledWriter::new(w, 8, StatsRecorder::new()); // 1000 B/s

        let n = tw.write(&[b'b'; 5000]).await.unwrap();
        assert!(n <= 1000, "first write forwarded {n} bytes");
    }

    #[tokio::test(start_paused = true)]
    async fn vectored_write_trims_to_budget() {
        let (w, _r) = duplex(64 * 1024);
        let mut tw = ThrottledWriter::new(w, 8, StatsRecorder::new()); // 1000 B/s

        // 20 slices of 100 bytes exceeds both INLINE_IOVEC and the budget.
        let src = [b'v'; 100];
        let slices: Vec<IoSlice<'_>> = (0..20).map(|_| IoSlice::new(&src)).collect();

        let n = tw.write_vectored(&slices).await.unwrap();
        assert!((1..=1000).contains(&n), "vectored write forwarded {n}");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_not_delayed() {
        let (w, _r) = duplex(64 * 1024);
        let mut tw = ThrottledWriter::new(w, 8, StatsRecorder::new()); // 1000 B/s

        tw.write_all(&[b'f'; 500]).await.unwrap(); // arms a sleep
        time::timeout(Duration::from_millis(1), tw.flush())
            .await
            .expect("flush should not wait for the pacing sleep")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_out_the_armed_sleep() {
        let (w, _r) = duplex(64 * 1024);
        let mut tw = ThrottledWriter::new(w, 8, StatsRecorder::new()); // 1000 B/s

        let start = Instant::now();
        tw.write_all(&[b's'; 1000]).await.unwrap();
        tw.shutdown().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_writer_is_pass_through() {
        let (w, mut r) = duplex(256);
        let stats = StatsRecorder::new();
        let mut tw = ThrottledWriter::new(w, 0, stats.clone());

        let start = Instant::now();
        tw.write_all(b"hello").await.unwrap();
        tw.flush().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        let mut buf = [0u8; 5];
        r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(stats.snapshot().bytes_throttled, 0);
    }
}
