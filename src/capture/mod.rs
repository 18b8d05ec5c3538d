//! Capture seam: the traits platform display/microphone adapters implement.

pub mod traits;

pub use traits::{AudioAdapter, CaptureAdapter, DeviceCallback};
