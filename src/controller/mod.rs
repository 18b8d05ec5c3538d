//! Session control: wires the pipeline together and runs the encode loop.

pub mod session;

pub use session::{ContainerFactory, ErrorCallback, SessionController, StatusCallback};
