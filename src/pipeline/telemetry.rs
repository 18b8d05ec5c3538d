//! Runtime telemetry counters
//!
//! Live counters owned by the controller, updated per event from the
//! capture/audio/encode threads and read by the UI with no lock. All
//! operations are relaxed atomics: the values are display-only.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::types::EncoderTier;

/// Live atomic counters for the current session.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    frames_captured: AtomicU64,
    frames_encoded: AtomicU64,
    frames_dropped: AtomicU64,
    dup_frames: AtomicU64,
    audio_packets: AtomicU64,
    frames_backlogged: AtomicU32,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Capture thread
    pub fn on_frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }
    pub fn on_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Encode thread
    pub fn on_frame_encoded(&self) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }
    pub fn on_duplicate_inserted(&self) {
        self.dup_frames.fetch_add(1, Ordering::Relaxed);
    }
    pub fn on_audio_written(&self) {
        self.audio_packets.fetch_add(1, Ordering::Relaxed);
    }

    /// Approximate count of frames sitting in the video queue, sampled by
    /// whoever builds snapshots.
    pub fn set_backlog(&self, n: u32) {
        self.frames_backlogged.store(n, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Relaxed)
    }
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
    pub fn duplicates_inserted(&self) -> u64 {
        self.dup_frames.load(Ordering::Relaxed)
    }
    pub fn audio_packets_written(&self) -> u64 {
        self.audio_packets.load(Ordering::Relaxed)
    }

    /// Clear all counters for a new session.
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.dup_frames.store(0, Ordering::Relaxed);
        self.audio_packets.store(0, Ordering::Relaxed);
        self.frames_backlogged.store(0, Ordering::Relaxed);
    }

    /// Copy the live counters into a plain snapshot for the UI.
    pub fn snapshot(&self, encoder_tier: Option<EncoderTier>, on_ac: bool) -> TelemetrySnapshot {
        TelemetrySnapshot {
            frames_captured: self.frames_captured(),
            frames_encoded: self.frames_encoded(),
            frames_dropped: self.frames_dropped(),
            duplicates_inserted: self.duplicates_inserted(),
            audio_packets: self.audio_packets_written(),
            frames_backlogged: self.frames_backlogged.load(Ordering::Relaxed),
            encoder_tier,
            on_ac,
        }
    }
}

/// Plain copy of all live counters, safe to hand to the UI thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub frames_captured: u64,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub duplicates_inserted: u64,
    pub audio_packets: u64,
    /// Frames currently sitting in the video queue.
    pub frames_backlogged: u32,
    /// Committed encoder tier; `None` while no session is active.
    pub encoder_tier: Option<EncoderTier>,
    pub on_ac: bool,
}

impl std::fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} captured, {} encoded ({} dup, {} dropped), {} audio pkts, backlog {}, tier {}, {}",
            self.frames_captured,
            self.frames_encoded,
            self.duplicates_inserted,
            self.frames_dropped,
            self.audio_packets,
            self.frames_backlogged,
            self.encoder_tier.map(|t| t.label()).unwrap_or("-"),
            if self.on_ac { "AC" } else { "battery" }
        )
    }
}
