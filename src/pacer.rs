//! Pacing math for bandwidth simulation.
//!
//! Pure helpers shared by the one-shot and streaming pacing paths. Rates are
//! expressed in **kilobits per second**; a rate of `0` means **unlimited** and
//! always yields a zero delay.
//!
//! Two forms are exposed:
//! - [`expected_transfer_time`] — the one-shot form: how long a payload of a
//!   known size *should* take at the configured rate. Used to delay a fully
//!   buffered upload before it is forwarded.
//! - [`remaining_delay`] — the running form: how much longer a transfer that
//!   has already moved `bytes` bytes in `elapsed` wall-clock time must wait to
//!   stay at or below the rate. Callers feed it the **cumulative** byte count
//!   of the stream, not the size of the last chunk; pacing each chunk in
//!   isolation drifts and lets a caller that pauses between reads burst past
//!   the cap afterwards. Comparing cumulative-expected against elapsed
//!   self-corrects.
//!
//! A computed remainder that is already in the past clamps to zero — the
//! stream is ahead of schedule and must never sleep a negative duration.

use std::time::Duration;

/// Converts a rate in kilobits per second to bytes per second.
///
/// `rate_kbps * 1000 / 8`, exact for any `u32` input.
#[inline]
pub fn bytes_per_second(rate_kbps: u32) -> u64 {
    rate_kbps as u64 * 1000 / 8
}

/// How long moving `bytes` bytes should take at `rate_kbps`.
///
/// Returns [`Duration::ZERO`] when the rate is `0` (unlimited) or there is
/// nothing to move.
pub fn expected_transfer_time(bytes: u64, rate_kbps: u32) -> Duration {
    if rate_kbps == 0 || bytes == 0 {
        return Duration::ZERO;
    }

    // u128 keeps the intermediate product exact for any realistic transfer.
    let bps = bytes_per_second(rate_kbps) as u128;
    let millis = bytes as u128 * 1000 / bps;
    Duration::from_millis(millis as u64)
}

/// Running form: the positive remainder between where the transfer should be
/// and where it actually is.
///
/// `bytes` is the cumulative count since the transfer started and `elapsed`
/// the wall-clock time since the first byte moved.
pub fn remaining_delay(bytes: u64, rate_kbps: u32, elapsed: Duration) -> Duration {
    expected_transfer_time(bytes, rate_kbps).saturating_sub(elapsed)
}
