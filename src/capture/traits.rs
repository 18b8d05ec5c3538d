//! Traits for the platform capture and audio adapters
//!
//! The pipeline core never talks to the OS capture APIs directly; a
//! platform layer (Windows Graphics Capture + WASAPI, ScreenCaptureKit,
//! PipeWire, ...) implements these traits and produces into the bounded
//! queues. Producers must never block on the consumer: when a push is
//! rejected, video drops the newest frame and audio evicts the oldest
//! packet.

use anyhow::Result;
use std::sync::Arc;

use crate::pipeline::queue::{AudioQueue, FrameQueue};
use crate::pipeline::sync::SyncManager;

/// Callback fired from an adapter's internal thread on device failure.
pub type DeviceCallback = Box<dyn Fn() + Send + Sync>;

/// Display capture adapter producing GPU frames.
///
/// Frames must arrive in the encoder's input layout (e.g. NV12) with PTS
/// stamped relative to the session anchor via the shared [`SyncManager`].
/// The capture thread should run at above-normal priority.
pub trait CaptureAdapter: Send {
    /// Bind the output queue and the session clock. Called once per
    /// session, before [`CaptureAdapter::start`].
    fn initialize(&mut self, queue: Arc<FrameQueue>, sync: Arc<SyncManager>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Stop producing. Must tolerate being called from the device-lost
    /// callback's own thread.
    fn stop(&mut self);

    /// Register the callback fired exactly once on unrecoverable device
    /// loss. It runs on the adapter's capture thread; the controller stops
    /// the session from there, so finalization also runs on that thread.
    fn set_device_lost_callback(&mut self, callback: DeviceCallback);

    /// Capture dimensions, valid after `initialize`.
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn frames_captured(&self) -> u64;
    fn frames_dropped(&self) -> u64;
}

/// Microphone adapter producing interleaved PCM packets.
///
/// When the device's native rate differs from the container's declared
/// 48 kHz the adapter resamples internally. While muted it keeps emitting
/// packets at the same cadence with zeroed payload and the silence flag
/// set. The audio thread should run at real-time priority where the
/// platform allows it.
pub trait AudioAdapter: Send {
    /// Bind the output queue and the session clock. Called once per
    /// session, before [`AudioAdapter::start`].
    fn initialize(&mut self, queue: Arc<AudioQueue>, sync: Arc<SyncManager>) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Switch between live PCM and injected silence; no pipeline state
    /// transition is involved.
    fn set_muted(&self, muted: bool);
    fn is_muted(&self) -> bool;

    /// Output format, valid after `initialize`.
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn bits_per_sample(&self) -> u16;

    /// Register the callback fired when the audio device is invalidated.
    /// The session continues with silence; this is advisory.
    fn set_device_invalid_callback(&mut self, callback: DeviceCallback);
}
