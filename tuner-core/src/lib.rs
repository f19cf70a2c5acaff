// tuner-core/src/lib.rs

//! The core logic for the harmonic tuner.
//! This crate is responsible for audio capture, pitch detection,
//! smoothing and note mapping. It is completely headless
//! and contains no presentation code.

pub mod audio;
pub mod config;
pub mod error;
pub mod pitch;
pub mod session;
pub mod smoothing;
pub mod tuning;

pub use audio::{AudioFrame, FrameSource};
pub use config::TunerConfig;
pub use error::TunerError;
pub use session::{Session, SessionState, TunerEvent, TuningResult};
