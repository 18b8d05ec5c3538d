//! H.264 encoding: tier fallback policy and power-aware profile clamping.
//!
//! The platform transform itself (Media Foundation, VideoToolbox, VAAPI,
//! ...) lives behind [`h264::H264Transform`]; this module owns the policy
//! around it: which tier to commit, when to force an IDR, and how the
//! requested profile is throttled on battery power.

pub mod h264;
pub mod power;

pub use h264::{EncoderError, H264Transform, TransformProvider, VideoEncoder};
pub use power::{clamp_for_power, AssumeAc, PowerProbe, PowerState};
