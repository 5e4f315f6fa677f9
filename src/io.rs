//! Extension traits for bolting pacing onto any Tokio I/O type.
//!
//! These blanket impls let you wrap an `AsyncRead`/`AsyncWrite` directly,
//! without going through the interceptor — useful when the thing to shape is
//! a raw stream rather than a request/response exchange.
//!
//! ```no_run
//! use netshaper::io::{ShapeReadExt, ShapeWriteExt};
//! use netshaper::stats::StatsRecorder;
//! use tokio::io;
//! use tokio::net::TcpStream;
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let stats = StatsRecorder::new();
//! let stream = TcpStream::connect("127.0.0.1:12345").await?;
//! let (reader, writer) = stream.into_split();
//!
//! let _reader = reader.pace_reads(1_500, stats.clone()); // 1.5 Mbps down
//! let _writer = writer.pace_writes(750, stats.clone());  // 750 Kbps up
//! # Ok(()) }
//! ```
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    stats::StatsRecorder,
    throttle::{ThrottledReader, ThrottledWriter},
};

/// Read-side pacing ergonomics.
pub trait ShapeReadExt: AsyncRead {
    /// Wraps this reader so throughput stays at or below `rate_kbps`.
    ///
    /// A rate of `0` disables pacing (pass-through).
    #[must_use]
    fn pace_reads(self, rate_kbps: u32, stats: Arc<StatsRecorder>) -> ThrottledReader<Self>
    where
        Self: Sized,
    {
        ThrottledReader::new(self, rate_kbps, stats)
    }
}

impl<T: AsyncRead> ShapeReadExt for T {}

/// Write-side pacing ergonomics.
pub trait ShapeWriteExt: AsyncWrite {
    /// Wraps this writer so throughput stays at or below `rate_kbps`.
    ///
    /// A rate of `0` disables pacing (pass-through).
    #[must_use]
    fn pace_writes(self, rate_kbps: u32, stats: Arc<StatsRecorder>) -> ThrottledWriter<Self>
    where
        Self: Sized,
    {
        ThrottledWriter::new(self, rate_kbps, stats)
    }
}

impl<T: AsyncWrite> ShapeWriteExt for T {}
