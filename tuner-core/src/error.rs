//! Errors surfaced by the tuner core.
//!
//! Silent frames and short frames are not errors: they travel through the
//! pipeline as "no pitch" and never reach this type.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TunerError {
    /// The capture device could not be found, opened or kept running.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A parameter was rejected before capture started.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl TunerError {
    pub(crate) fn device(err: impl std::fmt::Display) -> Self {
        TunerError::DeviceUnavailable(err.to_string())
    }
}
