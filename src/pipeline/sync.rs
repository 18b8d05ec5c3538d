//! Session time origin and pause-aware PTS rebasing
//!
//! [`SyncManager`] anchors the session epoch on the media clock and
//! accumulates paused time, so every component (capture, audio, encode)
//! derives presentation timestamps from the same rebased origin. Adapters
//! hold the manager through an `Arc` and stamp packets with
//! [`SyncManager::now_pts`].

use std::sync::atomic::{AtomicI64, Ordering};

use super::clock::MediaClock;

/// Anchors the session's presentation-time origin and tracks total paused
/// duration. All state is atomic so the instance can be shared across the
/// control thread and the producer threads.
#[derive(Debug, Default)]
pub struct SyncManager {
    /// Clock tick value captured at session start.
    anchor_ticks: AtomicI64,
    /// Clock tick value captured at pause; 0 while not paused.
    pause_start_ticks: AtomicI64,
    /// Total paused duration in 100-ns units.
    paused_accum_hns: AtomicI64,
}

impl SyncManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor the session epoch at "now" and clear pause state.
    pub fn start(&self) {
        self.anchor_ticks
            .store(MediaClock::global().now_ticks(), Ordering::Release);
        self.pause_start_ticks.store(0, Ordering::Release);
        self.paused_accum_hns.store(0, Ordering::Release);
    }

    /// Capture the pause instant. Call exactly at the pause transition.
    pub fn pause(&self) {
        self.pause_start_ticks
            .store(MediaClock::global().now_ticks(), Ordering::Release);
    }

    /// Fold the elapsed pause into the accumulator. Calling without a prior
    /// [`SyncManager::pause`] is a no-op.
    pub fn resume(&self) {
        let started = self.pause_start_ticks.swap(0, Ordering::AcqRel);
        if started > 0 {
            let clock = MediaClock::global();
            let paused = clock.ticks_to_hns(clock.now_ticks() - started);
            self.paused_accum_hns.fetch_add(paused, Ordering::AcqRel);
        }
    }

    /// Rebase a raw clock tick reading to a session PTS in 100-ns units:
    /// ticks since the anchor, minus accumulated pause time.
    pub fn to_pts(&self, ticks: i64) -> i64 {
        let anchor = self.anchor_ticks.load(Ordering::Acquire);
        let raw = MediaClock::global().ticks_to_hns(ticks - anchor);
        raw - self.paused_accum_hns.load(Ordering::Acquire)
    }

    /// Session PTS at "now".
    pub fn now_pts(&self) -> i64 {
        self.to_pts(MediaClock::global().now_ticks())
    }

    /// Total paused duration so far, in 100-ns units.
    pub fn paused_total_hns(&self) -> i64 {
        self.paused_accum_hns.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    const MS: i64 = 10_000; // 100-ns units per millisecond

    #[test]
    fn test_pts_starts_near_zero() {
        let sync = SyncManager::new();
        sync.start();
        let pts = sync.now_pts();
        assert!((0..50 * MS).contains(&pts), "pts = {}", pts);
    }

    #[test]
    fn test_to_pts_monotonic_outside_pause() {
        let sync = SyncManager::new();
        sync.start();
        let clock = MediaClock::global();
        let t1 = clock.now_ticks();
        thread::sleep(Duration::from_millis(2));
        let t2 = clock.now_ticks();
        assert!(sync.to_pts(t1) <= sync.to_pts(t2));
    }

    #[test]
    fn test_pause_excluded_from_pts() {
        let sync = SyncManager::new();
        sync.start();
        thread::sleep(Duration::from_millis(50));
        let p1 = sync.now_pts();

        sync.pause();
        thread::sleep(Duration::from_millis(100));
        sync.resume();
        thread::sleep(Duration::from_millis(10));
        let p2 = sync.now_pts();

        // The 100 ms pause must not appear in the delta; allow generous
        // scheduling slack on the two short sleeps.
        let delta = p2 - p1;
        assert!(delta >= 0, "pts went backwards across pause: {}", delta);
        assert!(delta < 80 * MS, "pause leaked into pts: {} hns", delta);
        assert!(sync.paused_total_hns() >= 100 * MS);
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let sync = SyncManager::new();
        sync.start();
        sync.resume();
        assert_eq!(sync.paused_total_hns(), 0);
    }

    #[test]
    fn test_consecutive_pauses_accumulate() {
        let sync = SyncManager::new();
        sync.start();
        for _ in 0..2 {
            sync.pause();
            thread::sleep(Duration::from_millis(20));
            sync.resume();
        }
        assert!(sync.paused_total_hns() >= 40 * MS);
    }
}
