//! Media pipeline core for a single-display, single-microphone screen recorder.
//!
//! This crate implements the recorder's engine room, separating concerns
//! between:
//! - Control/Coordination: session state machine and lifecycle management
//! - Data Transport: bounded queues and backpressure handling
//! - Timing: monotonic clock, pause-aware PTS rebasing, frame pacing
//! - Encoding: H.264 tier fallback and keyframe policy
//! - Persistence: staging-file muxing with atomic promotion on finalize
//!
//! # Architecture
//!
//! Capture and audio adapters produce into fixed-capacity queues; a single
//! encode thread drains both, paces video timestamps, feeds the encoder and
//! the muxer. The GUI shell drives the [`controller::SessionController`]
//! control surface and never touches the pipeline internals directly.
//! Platform capture/encode/mux backends plug in behind the traits in
//! [`capture::traits`], [`encoder`] and [`storage::mux`].

pub mod capture;
pub mod controller;
pub mod encoder;
pub mod pipeline;
pub mod storage;

pub use controller::SessionController;
pub use pipeline::clock::MediaClock;
pub use pipeline::pacer::{FramePacer, PaceAction};
pub use pipeline::queue::{AudioQueue, BoundedQueue, FrameQueue};
pub use pipeline::state::{SessionEvent, SessionMachine, SessionState};
pub use pipeline::sync::SyncManager;
pub use pipeline::telemetry::{TelemetrySnapshot, TelemetryStore};
pub use pipeline::types::{
    AudioPacket, AudioSample, EncodedSample, EncoderProfile, EncoderTier, GpuImage, VideoFrame,
};
