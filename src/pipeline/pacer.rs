//! Frame pacing normalization
//!
//! Capture timestamps arrive with jitter: late frames, missed frames, and
//! occasional bursts. [`FramePacer`] absorbs the jitter so the encoder sees
//! smooth, strictly increasing PTS:
//! - a gap larger than 1.5x the target interval signals the consumer to
//!   insert a duplicate of the previous frame
//! - the emitted PTS advance is clamped to 2x the target interval so a
//!   multi-frame gap cannot compound into drift
//! - on queue backpressure the frame is dropped outright
//!
//! State is atomic: only the encode thread calls [`FramePacer::pace`], but
//! the control thread calls [`FramePacer::reset`] on pause/resume so the
//! pause gap is not misread as a missed frame.

use log::debug;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// How the consumer should handle a paced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceAction {
    /// Frame is fine; encode it with the returned PTS.
    Accept,
    /// Gap exceeded 1.5x target: first re-encode the previous frame with a
    /// synthesized PTS, then encode this one.
    Duplicate,
    /// Queue backpressure: discard the frame entirely.
    Drop,
}

const UNSET: i64 = -1;

/// Smooths jittery capture PTS into a strictly increasing sequence.
#[derive(Debug)]
pub struct FramePacer {
    /// Target frame interval in 100-ns units (333,333 for 30 fps).
    interval_hns: AtomicI64,
    /// Last raw PTS observed; [`UNSET`] until the first frame.
    last_raw: AtomicI64,
    /// Last emitted PTS.
    smoothed: AtomicI64,
    dups: AtomicU32,
    drops: AtomicU32,
}

impl FramePacer {
    /// Build a pacer for the given target frame rate.
    pub fn new(fps: u32) -> Self {
        let pacer = Self {
            interval_hns: AtomicI64::new(333_333),
            last_raw: AtomicI64::new(UNSET),
            smoothed: AtomicI64::new(UNSET),
            dups: AtomicU32::new(0),
            drops: AtomicU32::new(0),
        };
        pacer.initialize(fps);
        pacer
    }

    /// Re-arm for a new session: set the target interval and clear all
    /// pacing state and counters.
    pub fn initialize(&self, fps: u32) {
        let interval = if fps > 0 {
            crate::pipeline::clock::HNS_PER_SEC / fps as i64
        } else {
            333_333
        };
        self.interval_hns.store(interval, Ordering::Relaxed);
        self.last_raw.store(UNSET, Ordering::Relaxed);
        self.smoothed.store(UNSET, Ordering::Relaxed);
        self.dups.store(0, Ordering::Relaxed);
        self.drops.store(0, Ordering::Relaxed);
        debug!(
            "FramePacer: target interval {} hns (~{} fps)",
            interval, fps
        );
    }

    /// Clear the pacing baseline so the next frame re-bootstraps. Called on
    /// pause and resume; counters survive across the reset.
    pub fn reset(&self) {
        self.last_raw.store(UNSET, Ordering::Relaxed);
        self.smoothed.store(UNSET, Ordering::Relaxed);
    }

    /// Classify an incoming raw PTS and compute the corrected output PTS.
    ///
    /// `queue_full` reports backpressure at the point the frame was taken;
    /// a backpressured frame is dropped without touching the pacing state.
    pub fn pace(&self, raw_pts: i64, queue_full: bool) -> (PaceAction, i64) {
        if queue_full {
            self.drops.fetch_add(1, Ordering::Relaxed);
            return (PaceAction::Drop, raw_pts);
        }

        let last = self.last_raw.load(Ordering::Relaxed);
        if last == UNSET {
            self.last_raw.store(raw_pts, Ordering::Relaxed);
            self.smoothed.store(raw_pts, Ordering::Relaxed);
            return (PaceAction::Accept, raw_pts);
        }

        let interval = self.interval_hns.load(Ordering::Relaxed);
        let gap = raw_pts - last;
        let need_dup = gap > interval * 3 / 2;
        if need_dup {
            let dups = self.dups.fetch_add(1, Ordering::Relaxed) + 1;
            if dups <= 3 || dups % 30 == 0 {
                debug!(
                    "FramePacer: gap {} > 1.5x target {}, signalling duplicate (count={})",
                    gap, interval, dups
                );
            }
        }

        // Clamp the advance: at most 2x the interval per frame, and at
        // least one unit so the emitted sequence stays strictly increasing
        // even when capture timestamps regress.
        let clamped_gap = gap.clamp(1, interval * 2);
        let out = self.smoothed.load(Ordering::Relaxed) + clamped_gap;
        self.smoothed.store(out, Ordering::Relaxed);
        self.last_raw.store(raw_pts, Ordering::Relaxed);

        let action = if need_dup {
            PaceAction::Duplicate
        } else {
            PaceAction::Accept
        };
        (action, out)
    }

    /// Target frame interval in 100-ns units.
    pub fn target_interval_hns(&self) -> i64 {
        self.interval_hns.load(Ordering::Relaxed)
    }

    /// Synthetic duplicates signalled so far.
    pub fn duplicates_inserted(&self) -> u32 {
        self.dups.load(Ordering::Relaxed)
    }

    /// Backpressure drops so far.
    pub fn drops(&self) -> u32 {
        self.drops.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T30: i64 = 333_333; // 30 fps target interval in hns

    #[test]
    fn test_first_frame_bootstraps() {
        let pacer = FramePacer::new(30);
        let (action, pts) = pacer.pace(1_000_000, false);
        assert_eq!(action, PaceAction::Accept);
        assert_eq!(pts, 1_000_000);
    }

    #[test]
    fn test_gap_sequence() {
        // Two clean intervals, a 4x gap, then clean again.
        let pacer = FramePacer::new(30);
        let inputs = [333_333i64, 666_666, 2_000_000, 2_333_333];
        let mut actions = Vec::new();
        let mut outputs = Vec::new();
        for pts in inputs {
            let (action, out) = pacer.pace(pts, false);
            actions.push(action);
            outputs.push(out);
        }
        assert_eq!(
            actions,
            [
                PaceAction::Accept,
                PaceAction::Accept,
                PaceAction::Duplicate,
                PaceAction::Accept
            ]
        );
        assert!(outputs.windows(2).all(|w| w[1] > w[0]), "{:?}", outputs);
        assert_eq!(pacer.duplicates_inserted(), 1);
    }

    #[test]
    fn test_backpressure_drop() {
        let pacer = FramePacer::new(30);
        let (action, pts) = pacer.pace(500, true);
        assert_eq!(action, PaceAction::Drop);
        assert_eq!(pts, 500);
        assert_eq!(pacer.drops(), 1);
        pacer.pace(900, true);
        assert_eq!(pacer.drops(), 2);
        // Drops do not disturb the pacing baseline.
        let (action, _) = pacer.pace(1_000, false);
        assert_eq!(action, PaceAction::Accept);
    }

    #[test]
    fn test_clamp_bounds_catch_up() {
        let pacer = FramePacer::new(30);
        pacer.pace(0, false);
        // A ten-interval gap advances the output by at most 2x the target.
        let (action, out) = pacer.pace(10 * T30, false);
        assert_eq!(action, PaceAction::Duplicate);
        assert_eq!(out, 2 * T30);
    }

    #[test]
    fn test_regressing_input_stays_increasing() {
        let pacer = FramePacer::new(30);
        pacer.pace(1_000_000, false);
        let (_, a) = pacer.pace(1_000_000 + T30, false);
        // Raw PTS steps backwards; output must still advance.
        let (_, b) = pacer.pace(1_000_000, false);
        assert!(b > a);
    }

    #[test]
    fn test_reset_rebootstraps() {
        let pacer = FramePacer::new(30);
        pacer.pace(0, false);
        pacer.pace(T30, false);
        pacer.reset();
        // A huge post-reset PTS (a pause gap) is not treated as a skip.
        let (action, out) = pacer.pace(50_000_000, false);
        assert_eq!(action, PaceAction::Accept);
        assert_eq!(out, 50_000_000);
        assert_eq!(pacer.duplicates_inserted(), 0);
    }

    #[test]
    fn test_hour_of_jitter_stays_monotonic() {
        // One simulated hour at 30 fps with +-10 ms of uniform jitter.
        let pacer = FramePacer::new(30);
        let total = 30 * 60 * 60;
        let mut seed = 0x243F_6A88_85A3_08D3u64;
        let mut xorshift = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut last_out = i64::MIN;
        let mut max_gap = 0i64;
        let mut emitted = 0u32;
        for i in 0..total {
            let jitter = (xorshift() % 200_000) as i64 - 100_000; // +-10 ms in hns
            let raw = i as i64 * T30 + jitter;
            let (action, out) = pacer.pace(raw, false);
            if action == PaceAction::Drop {
                continue;
            }
            assert!(out > last_out, "non-monotonic at frame {}", i);
            if last_out != i64::MIN {
                max_gap = max_gap.max(out - last_out);
            }
            last_out = out;
            emitted += 1;
        }

        assert_eq!(pacer.drops(), 0);
        assert!(emitted > 0);
        assert!(
            max_gap <= 3 * T30,
            "inter-output gap {} exceeds 3x target",
            max_gap
        );
    }
}
