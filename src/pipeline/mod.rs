//! Pipeline layer: timing, transport and session control primitives.
//!
//! This module provides the recorder's engine-room building blocks,
//! separating concerns between:
//! - Timing: [`clock::MediaClock`], [`sync::SyncManager`], [`pacer::FramePacer`]
//! - Data Transport: [`queue::BoundedQueue`] and its drop policies
//! - Control: [`state::SessionMachine`] with validated transitions
//! - Observability: [`telemetry::TelemetryStore`] atomic counters
//!
//! # Architecture
//!
//! Producers (capture and audio adapters) push into fixed-capacity queues;
//! the encode thread drains them. Nothing in this layer blocks a producer:
//! a full queue triggers the per-queue drop policy, and all shared state is
//! atomic or guarded by short, rare critical sections.

pub mod clock;
pub mod pacer;
pub mod queue;
pub mod state;
pub mod sync;
pub mod telemetry;
pub mod types;

pub use clock::MediaClock;
pub use pacer::{FramePacer, PaceAction};
pub use queue::{AudioQueue, BoundedQueue, FrameQueue};
pub use state::{SessionEvent, SessionMachine, SessionState};
pub use sync::SyncManager;
pub use telemetry::{TelemetrySnapshot, TelemetryStore};
pub use types::{AudioPacket, AudioSample, EncodedSample, EncoderProfile, EncoderTier, VideoFrame};
