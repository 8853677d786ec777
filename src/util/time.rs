//! Timing helpers
//!
//! Wall-clock timestamps here are epoch seconds as `f64`, because every
//! timestamp that crosses a process or host boundary (response-time CSV rows,
//! ctime-size attributes, histogram dump headers) is a floating-point epoch
//! value in the wire formats.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time as floating-point epoch seconds.
#[inline]
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Format a duration in human-readable form
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use metapulse::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos < 1_000 {
        format!("{}ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", nanos as f64 / 1_000_000_000.0)
    }
}

/// Calculate a per-second rate from a count and an elapsed interval in
/// seconds, returning 0.0 for degenerate intervals.
pub fn rate(count: u64, elapsed_sec: f64) -> f64 {
    if elapsed_sec > 0.0 {
        count as f64 / elapsed_sec
    } else {
        0.0
    }
}
