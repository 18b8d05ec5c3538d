//! Core types for the recording pipeline

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque GPU-resident image produced by the capture adapter.
///
/// The pipeline never reads or mutates the image; it only retains shared
/// ownership until the encoder has consumed it. Adapters that recycle a
/// single conversion target must hand out one handle per frame.
pub trait GpuImage: Send + Sync {}

/// Video frame flowing from capture to encode.
///
/// Move-only through the queue; the image handle is reference-counted so
/// the encode loop can retain the previous frame for duplicate insertion.
pub struct VideoFrame {
    /// Shared handle to the GPU image backing this frame.
    pub image: Arc<dyn GpuImage>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in 100-ns units, relative to the session anchor.
    pub pts_hns: i64,
    /// Set on frames synthesized by the pacer, never on captured frames.
    pub is_duplicate: bool,
}

impl VideoFrame {
    pub fn new(image: Arc<dyn GpuImage>, width: u32, height: u32, pts_hns: i64) -> Self {
        Self {
            image,
            width,
            height,
            pts_hns,
            is_duplicate: false,
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts_hns", &self.pts_hns)
            .field("is_duplicate", &self.is_duplicate)
            .finish()
    }
}

/// Interleaved PCM packet from the audio adapter or the silence injector.
#[derive(Clone, Debug)]
pub struct AudioPacket {
    /// Interleaved PCM payload (small, ~1–20 KB; cheap to clone).
    pub data: Bytes,
    /// Number of audio frames (sample groups across channels) in the payload.
    pub frame_count: u32,
    /// Presentation timestamp in 100-ns units, relative to the session anchor.
    pub pts_hns: i64,
    /// True when the payload is injected silence (muted capture).
    pub is_silence: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioPacket {
    /// Build a zeroed 16-bit PCM packet for the given frame count.
    ///
    /// Used by adapters while muted: same cadence, silent payload.
    pub fn silence(frame_count: u32, pts_hns: i64, sample_rate: u32, channels: u16) -> Self {
        let bytes = frame_count as usize * channels as usize * 2;
        Self {
            data: Bytes::from(vec![0u8; bytes]),
            frame_count,
            pts_hns,
            is_silence: true,
            sample_rate,
            channels,
        }
    }

    /// Payload duration in 100-ns units.
    pub fn duration_hns(&self) -> i64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frame_count as i64 * crate::pipeline::clock::HNS_PER_SEC / self.sample_rate as i64
    }
}

/// Compressed H.264 access unit leaving the encoder.
#[derive(Clone, Debug)]
pub struct EncodedSample {
    pub data: Bytes,
    pub pts_hns: i64,
    pub duration_hns: i64,
    pub is_keyframe: bool,
}

/// PCM sample wrapped for the muxer, with its duration resolved.
#[derive(Clone, Debug)]
pub struct AudioSample {
    pub data: Bytes,
    pub pts_hns: i64,
    pub duration_hns: i64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioSample {
    /// Wrap an audio packet, computing duration from its frame count.
    pub fn from_packet(pkt: &AudioPacket) -> Self {
        Self {
            data: pkt.data.clone(),
            pts_hns: pkt.pts_hns,
            duration_hns: pkt.duration_hns(),
            sample_rate: pkt.sample_rate,
            channels: pkt.channels,
        }
    }
}

/// H.264 profile tag for the encoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Profile {
    Baseline,
    Main,
}

/// Encoder configuration resolved at session start.
///
/// Rate control is constant-bitrate; the GOP is `gop_seconds * fps` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u32,
    pub gop_seconds: u32,
    pub low_latency: bool,
    pub b_frames: u32,
    pub profile: H264Profile,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate_bps: 8_000_000,
            gop_seconds: 2,
            low_latency: true,
            b_frames: 0,
            profile: H264Profile::Main,
        }
    }
}

impl EncoderProfile {
    /// GOP length in frames (`2 * fps` with the default settings).
    pub fn gop_frames(&self) -> u32 {
        self.gop_seconds * self.fps
    }
}

/// Committed encoder fallback tier; fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderTier {
    /// Hardware transform sharing the host graphics device.
    Hardware,
    /// Software transform at the requested resolution.
    Software,
    /// Software transform at the degraded 1280x720 / 30 fps profile.
    Software720p,
}

impl EncoderTier {
    pub fn label(&self) -> &'static str {
        match self {
            EncoderTier::Hardware => "HW",
            EncoderTier::Software => "SW",
            EncoderTier::Software720p => "SW 720p",
        }
    }
}

impl std::fmt::Display for EncoderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeImage;
    impl GpuImage for FakeImage {}

    #[test]
    fn test_silence_packet_shape() {
        let pkt = AudioPacket::silence(480, 1_000, 48_000, 2);
        assert!(pkt.is_silence);
        assert_eq!(pkt.data.len(), 480 * 2 * 2);
        assert!(pkt.data.iter().all(|&b| b == 0));
        // 480 frames at 48 kHz is exactly 10 ms.
        assert_eq!(pkt.duration_hns(), 100_000);
    }

    #[test]
    fn test_audio_sample_duration() {
        let pkt = AudioPacket {
            data: Bytes::from_static(&[0; 4]),
            frame_count: 48_000,
            pts_hns: 0,
            is_silence: false,
            sample_rate: 48_000,
            channels: 2,
        };
        let sample = AudioSample::from_packet(&pkt);
        assert_eq!(sample.duration_hns, crate::pipeline::clock::HNS_PER_SEC);
    }

    #[test]
    fn test_frame_retains_shared_image() {
        let image: Arc<dyn GpuImage> = Arc::new(FakeImage);
        let frame = VideoFrame::new(image.clone(), 1920, 1080, 333_333);
        // Pipeline and caller share ownership of the GPU handle.
        assert_eq!(Arc::strong_count(&image), 2);
        drop(frame);
        assert_eq!(Arc::strong_count(&image), 1);
    }

    #[test]
    fn test_profile_defaults() {
        let p = EncoderProfile::default();
        assert_eq!(p.fps, 30);
        assert_eq!(p.bitrate_bps, 8_000_000);
        assert_eq!(p.b_frames, 0);
        assert_eq!(p.gop_frames(), 60);
        assert!(p.low_latency);
    }
}
