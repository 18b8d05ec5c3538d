//! Monotonic media clock
//!
//! Provides a unified time base for the whole pipeline. All presentation
//! timestamps are expressed in 100-nanosecond units ("hns") relative to the
//! clock's own epoch; callers must not assume any relationship with
//! wall-clock time.
//!
//! # Design
//!
//! The clock captures its base instant and tick frequency exactly once, at
//! first use, and is immutable afterwards. Raw readings are "ticks"
//! (nanoseconds since the base); [`MediaClock::ticks_to_hns`] converts any
//! tick reading to the shared 100-ns unit. Conversions go through 128-bit
//! intermediates so hour- and day-long sessions cannot accumulate rounding
//! drift.

use once_cell::sync::Lazy;
use std::time::Instant;

/// Raw ticks per second. Ticks are nanoseconds of the monotonic clock.
const TICKS_PER_SEC: i64 = 1_000_000_000;

/// 100-nanosecond units per second.
pub const HNS_PER_SEC: i64 = 10_000_000;

static CLOCK: Lazy<MediaClock> = Lazy::new(MediaClock::new);

/// Monotonic high-resolution clock with a fixed 100-ns media time base.
///
/// One process-wide instance exists (see [`MediaClock::global`]); calls
/// never fail and never suspend.
pub struct MediaClock {
    base: Instant,
    freq: i64,
}

impl MediaClock {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            freq: TICKS_PER_SEC,
        }
    }

    /// The process-wide clock instance, initialized on first access.
    pub fn global() -> &'static MediaClock {
        &CLOCK
    }

    /// Current raw tick reading (nanoseconds since the clock base).
    pub fn now_ticks(&self) -> i64 {
        self.base.elapsed().as_nanos() as i64
    }

    /// Current time in 100-ns units since the clock base.
    pub fn now_hns(&self) -> i64 {
        self.ticks_to_hns(self.now_ticks())
    }

    /// Convert a raw tick reading (or tick delta) to 100-ns units.
    pub fn ticks_to_hns(&self, ticks: i64) -> i64 {
        ((ticks as i128 * HNS_PER_SEC as i128) / self.freq as i128) as i64
    }

    /// Tick frequency in ticks per second, captured at initialization.
    pub fn frequency(&self) -> i64 {
        self.freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_now_is_monotonic() {
        let clock = MediaClock::global();
        let a = clock.now_hns();
        thread::sleep(Duration::from_millis(5));
        let b = clock.now_hns();
        assert!(b > a, "clock went backwards: {} -> {}", a, b);
    }

    #[test]
    fn test_tick_conversion() {
        let clock = MediaClock::global();
        // One second of ticks is exactly one second of hns.
        assert_eq!(clock.ticks_to_hns(TICKS_PER_SEC), HNS_PER_SEC);
        // 100 ns is one hns unit.
        assert_eq!(clock.ticks_to_hns(100), 1);
        // Negative deltas convert symmetrically.
        assert_eq!(clock.ticks_to_hns(-TICKS_PER_SEC), -HNS_PER_SEC);
    }

    #[test]
    fn test_conversion_no_drift_on_long_spans() {
        let clock = MediaClock::global();
        // 72 hours of ticks, far beyond a recording session.
        let ticks = 72 * 3600 * TICKS_PER_SEC;
        assert_eq!(clock.ticks_to_hns(ticks), 72 * 3600 * HNS_PER_SEC);
    }

    #[test]
    fn test_global_is_stable() {
        let a = MediaClock::global() as *const _;
        let b = MediaClock::global() as *const _;
        assert_eq!(a, b);
    }
}
