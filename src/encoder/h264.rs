//! H.264 encoder with a three-tier fallback chain
//!
//! Initialization walks the chain and commits to the first tier that
//! succeeds:
//!
//! 1. hardware transform at the requested resolution, sharing the host
//!    graphics device
//! 2. software transform at the requested resolution
//! 3. software transform at the safe 1280x720 / 30 fps profile, keeping
//!    the user's target bitrate
//!
//! The committed tier is fixed for the whole session; there is no silent
//! mid-session downgrade. Every tier transition is logged.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::pipeline::types::{EncodedSample, EncoderProfile, EncoderTier, GpuImage};

/// Degraded-mode fallback resolution and frame rate.
const FALLBACK_WIDTH: u32 = 1280;
const FALLBACK_HEIGHT: u32 = 720;
const FALLBACK_FPS: u32 = 30;

#[derive(Debug, Error)]
pub enum EncoderError {
    /// The platform transform rejected configuration or a frame.
    #[error("encoder backend: {0}")]
    Backend(String),

    /// Every tier in the fallback chain failed to initialize.
    #[error("no H.264 encoder tier available")]
    NoTierAvailable,
}

/// A configured platform H.264 transform committed to one tier.
///
/// `encode` may legitimately produce nothing for a submitted frame (the
/// transform needs more input); that is `Ok(None)`, not an error.
pub trait H264Transform: Send {
    fn encode(
        &mut self,
        image: &Arc<dyn GpuImage>,
        pts_hns: i64,
        force_idr: bool,
    ) -> Result<Option<EncodedSample>, EncoderError>;

    /// Drain buffered frames during shutdown.
    fn flush(&mut self) -> Result<Vec<EncodedSample>, EncoderError>;
}

/// Factory for platform transforms, one call per fallback tier attempt.
///
/// Implementations configure the transform for constant bitrate, a GOP of
/// `profile.gop_frames()`, low latency, zero B-frames and the requested
/// Baseline/Main profile before returning it.
pub trait TransformProvider: Send {
    /// Open a hardware transform attached to the host graphics device.
    fn open_hardware(
        &mut self,
        profile: &EncoderProfile,
    ) -> Result<Box<dyn H264Transform>, EncoderError>;

    /// Open a software transform.
    fn open_software(
        &mut self,
        profile: &EncoderProfile,
    ) -> Result<Box<dyn H264Transform>, EncoderError>;
}

/// H.264 encoder: fallback-chain owner and keyframe policy.
pub struct VideoEncoder {
    transform: Box<dyn H264Transform>,
    tier: EncoderTier,
    committed: EncoderProfile,
    force_keyframe: Arc<AtomicBool>,
}

impl std::fmt::Debug for VideoEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoEncoder")
            .field("tier", &self.tier)
            .field("committed", &self.committed)
            .field("force_keyframe", &self.force_keyframe)
            .finish()
    }
}

impl VideoEncoder {
    /// Walk the fallback chain and commit to the first tier that opens.
    pub fn initialize(
        requested: &EncoderProfile,
        provider: &mut dyn TransformProvider,
    ) -> Result<Self, EncoderError> {
        match provider.open_hardware(requested) {
            Ok(transform) => {
                info!(
                    "VideoEncoder: hardware tier committed ({}x{} @ {} fps, {} bps)",
                    requested.width, requested.height, requested.fps, requested.bitrate_bps
                );
                return Ok(Self::committed(transform, EncoderTier::Hardware, *requested));
            }
            Err(e) => warn!("VideoEncoder: hardware tier unavailable: {}", e),
        }

        match provider.open_software(requested) {
            Ok(transform) => {
                info!(
                    "VideoEncoder: software tier committed ({}x{} @ {} fps)",
                    requested.width, requested.height, requested.fps
                );
                return Ok(Self::committed(transform, EncoderTier::Software, *requested));
            }
            Err(e) => warn!(
                "VideoEncoder: software tier at {}x{} unavailable: {}",
                requested.width, requested.height, e
            ),
        }

        let degraded = EncoderProfile {
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
            fps: FALLBACK_FPS,
            ..*requested
        };
        match provider.open_software(&degraded) {
            Ok(transform) => {
                warn!(
                    "VideoEncoder: degraded 720p30 tier committed ({} bps)",
                    degraded.bitrate_bps
                );
                Ok(Self::committed(
                    transform,
                    EncoderTier::Software720p,
                    degraded,
                ))
            }
            Err(e) => {
                warn!("VideoEncoder: degraded 720p30 tier unavailable: {}", e);
                Err(EncoderError::NoTierAvailable)
            }
        }
    }

    fn committed(
        transform: Box<dyn H264Transform>,
        tier: EncoderTier,
        committed: EncoderProfile,
    ) -> Self {
        Self {
            transform,
            tier,
            committed,
            force_keyframe: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submit one frame. `Ok(None)` means the transform needs more input.
    pub fn encode(
        &mut self,
        image: &Arc<dyn GpuImage>,
        pts_hns: i64,
    ) -> Result<Option<EncodedSample>, EncoderError> {
        let force_idr = self.force_keyframe.swap(false, Ordering::AcqRel);
        self.transform.encode(image, pts_hns, force_idr)
    }

    /// Drain remaining frames from the transform during shutdown.
    pub fn flush(&mut self) -> Result<Vec<EncodedSample>, EncoderError> {
        self.transform.flush()
    }

    /// Force the next encoded frame to an IDR. Called on every resume so
    /// the post-pause segment is independently decodable.
    pub fn request_keyframe(&self) {
        self.force_keyframe.store(true, Ordering::Release);
    }

    /// Shared one-shot IDR flag, for callers that outlive the encoder's
    /// owner thread (the controller keeps a clone across the session).
    pub fn force_keyframe_flag(&self) -> Arc<AtomicBool> {
        self.force_keyframe.clone()
    }

    pub fn tier(&self) -> EncoderTier {
        self.tier
    }

    /// Output dimensions and rate of the committed tier (differs from the
    /// request only on the 720p30 fallback).
    pub fn output_width(&self) -> u32 {
        self.committed.width
    }
    pub fn output_height(&self) -> u32 {
        self.committed.height
    }
    pub fn output_fps(&self) -> u32 {
        self.committed.fps
    }
}
