//! Persistence: output directory management and resilient MP4 writing.
//!
//! Recordings are written to a `*.partial.mp4` staging file held under an
//! exclusive write lock and promoted to the final `*.mp4` name by an
//! atomic rename at finalization. A crash leaves the staging file behind
//! for the orphan-recovery flow at next launch.

pub mod manager;
pub mod mux;

pub use manager::{StorageError, StorageManager};
pub use mux::{ContainerBackend, MuxConfig, MuxError, MuxWriter};
