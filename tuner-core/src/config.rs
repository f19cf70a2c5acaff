//! # Configuration Module
//!
//! Holds every option the tuner core recognizes, with the defaults used
//! for live instrument tuning.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::time::Duration;

use crate::error::TunerError;

/// Default target pitch (A4).
pub const DEFAULT_TARGET_HZ: f32 = 440.0;
/// Default averaging horizon for the smoother.
pub const DEFAULT_SMOOTHING_WINDOW_MS: u64 = 4000;
/// Number of samples per audio frame.
///
/// Larger frames give the autocorrelation more periods to work with
/// but increase latency (~93ms at 44.1kHz).
pub const DEFAULT_FRAME_LENGTH: usize = 4096;
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 44100;
pub const DEFAULT_MIN_DETECTABLE_HZ: f32 = 50.0;
pub const DEFAULT_MAX_DETECTABLE_HZ: f32 = 2000.0;
/// Frame energy at or below which a frame is treated as silence.
pub const DEFAULT_SILENCE_ENERGY: f64 = 1e-8;

/// Session configuration shared by the capture source, the detector
/// and the smoother.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TunerConfig {
    pub target_frequency_hz: f32,
    pub smoothing_window_ms: u64,
    pub frame_length: usize,
    pub sample_rate_hz: u32,
    pub min_detectable_hz: f32,
    pub max_detectable_hz: f32,
    pub silence_energy: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            target_frequency_hz: DEFAULT_TARGET_HZ,
            smoothing_window_ms: DEFAULT_SMOOTHING_WINDOW_MS,
            frame_length: DEFAULT_FRAME_LENGTH,
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            min_detectable_hz: DEFAULT_MIN_DETECTABLE_HZ,
            max_detectable_hz: DEFAULT_MAX_DETECTABLE_HZ,
            silence_energy: DEFAULT_SILENCE_ENERGY,
        }
    }
}

impl TunerConfig {
    /// Checks every parameter, returning the first problem found.
    pub fn validate(&self) -> Result<(), TunerError> {
        validate_target(self.target_frequency_hz)?;
        if self.smoothing_window_ms == 0 {
            return Err(invalid("smoothing window must be a positive number of milliseconds"));
        }
        if self.frame_length == 0 {
            return Err(invalid("frame length must be a positive number of samples"));
        }
        if self.sample_rate_hz == 0 {
            return Err(invalid("sample rate must be positive"));
        }
        let (min, max) = (self.min_detectable_hz, self.max_detectable_hz);
        if !(min.is_finite() && max.is_finite() && min > 0.0 && min < max) {
            return Err(invalid(format!(
                "detectable range must satisfy 0 < min < max (got {min} Hz to {max} Hz)"
            )));
        }
        if self.silence_energy.is_nan() || self.silence_energy < 0.0 {
            return Err(invalid("silence energy threshold must not be negative"));
        }
        Ok(())
    }

    pub fn smoothing_window(&self) -> Duration {
        Duration::from_millis(self.smoothing_window_ms)
    }

    /// Wall-clock length of one full frame at the configured sample rate.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_length as f64 / self.sample_rate_hz.max(1) as f64)
    }

    /// Lowest pitch a frame of `frame_length` samples reports correctly.
    ///
    /// Every lag shares one energy normalization, so the shortest admissible
    /// lag keeps its large overlap. A pure tone of frequency `f` loses to it
    /// unless `n * (2π f L_min / sr)² / 2 > sr / f`, which solved for `f`
    /// gives this floor.
    pub fn lowest_reliable_hz(&self) -> f32 {
        let sr = f64::from(self.sample_rate_hz.max(1));
        let n = self.frame_length.max(1) as f64;
        (sr / (2.0 * PI * PI * n * self.shortest_lag().powi(2)).cbrt()) as f32
    }

    /// Smallest frame length whose reliable floor reaches `min_hz`.
    pub fn frame_length_for(&self, min_hz: f32) -> usize {
        let period = f64::from(self.sample_rate_hz.max(1)) / f64::from(min_hz);
        (period.powi(3) / (2.0 * PI * PI * self.shortest_lag().powi(2))).ceil() as usize
    }

    fn shortest_lag(&self) -> f64 {
        ((self.sample_rate_hz as f32 / self.max_detectable_hz) as usize).max(1) as f64
    }
}

/// Rejects anything that is not a positive, finite frequency.
pub fn validate_target(target_hz: f32) -> Result<(), TunerError> {
    if target_hz.is_finite() && target_hz > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!(
            "target frequency must be a positive number of Hz (got {target_hz})"
        )))
    }
}

fn invalid(msg: impl Into<String>) -> TunerError {
    TunerError::InvalidConfiguration(msg.into())
}
