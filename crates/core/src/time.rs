//! Monotonic-to-wall-clock conversion.
//!
//! The pipeline labels every block with a device timestamp drawn from a
//! monotonic clock. Wall-clock time is only needed at the edges (log lines,
//! recorder filenames, the processed-data log), so a single pair of anchors
//! captured at stream start does the conversion; nothing in the hot path
//! calls into the wall clock. Mirrors `timing.cpp`'s `duration_to_systime`.

use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};

/// A monotonic device-time offset in microseconds relative to stream start.
pub type DataTics = i64;

#[derive(Debug, Clone, Copy)]
pub struct StreamEpoch {
    mono_anchor: Instant,
    wall_anchor: SystemTime,
}

impl StreamEpoch {
    pub fn capture() -> StreamEpoch {
        StreamEpoch {
            mono_anchor: Instant::now(),
            wall_anchor: SystemTime::now(),
        }
    }

    /// Device-time offset (seconds, relative to an implementation-defined
    /// device epoch) converted to `DataTics` relative to *this* stream's
    /// start. Callers seed `device_time_at_start` once by calling this with
    /// the first observed device time.
    pub fn tics_since(&self, elapsed: Duration) -> DataTics {
        (elapsed.as_secs_f64() * 1.0e6).round() as DataTics
    }

    /// Wall-clock instant corresponding to a `DataTics` offset from stream
    /// start. `Δ = round((τ − τ₀) · 1e6)` already folded into `tics`.
    pub fn wall_clock_at(&self, tics: DataTics) -> DateTime<Utc> {
        let wall: DateTime<Utc> = self.wall_anchor.into();
        wall + chrono::Duration::microseconds(tics)
    }

    /// Monotonic elapsed time since stream start, for components (e.g. the
    /// simulated ADC source) that need to pace themselves rather than format
    /// a timestamp.
    pub fn elapsed(&self) -> Duration {
        self.mono_anchor.elapsed()
    }
}

/// Formats a wall-clock instant as `YYYY,MM,DD,HH:MM:SS.ffffff`, the exact
/// layout the processed-data log uses.
pub fn format_processed_log_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y,%m,%d,%H:%M:%S%.6f").to_string()
}

/// Formats a wall-clock instant as `YYYY-MM-DD HH:MM:SS.mmm`, UTC millisecond
/// resolution, for the structured log sink.
pub fn format_log_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tics_round_trip_is_monotonic() {
        let epoch = StreamEpoch::capture();
        let t1 = epoch.tics_since(Duration::from_millis(10));
        let t2 = epoch.tics_since(Duration::from_millis(20));
        assert!(t2 > t1);
    }

    #[test]
    fn wall_clock_advances_with_tics() {
        let epoch = StreamEpoch::capture();
        let a = epoch.wall_clock_at(0);
        let b = epoch.wall_clock_at(1_000_000);
        assert_eq!((b - a).num_seconds(), 1);
    }
}
