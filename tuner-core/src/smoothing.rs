//! # Smoothing Module
//!
//! Averages recent pitch estimates over a fixed time horizon so the tuner
//! display settles instead of jumping with every frame.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Time-windowed running average of valid frequency estimates.
///
/// Eviction is by age only: a burst of readings never pushes out earlier
/// ones that are still inside the horizon.
#[derive(Debug, Clone)]
pub struct Smoother {
    horizon: Duration,
    readings: VecDeque<(f32, Instant)>,
}

impl Smoother {
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            readings: VecDeque::new(),
        }
    }

    /// Admits a detector output taken at `at`. "No pitch" is ignored.
    pub fn observe(&mut self, estimate: Option<f32>, at: Instant) {
        if let Some(freq) = estimate.filter(|f| f.is_finite() && *f > 0.0) {
            self.readings.push_back((freq, at));
        }
    }

    /// Evicts readings older than the horizon, then averages what is left.
    ///
    /// Returns `None` when the window is empty.
    pub fn average(&mut self, now: Instant) -> Option<f32> {
        let horizon = self.horizon;
        self.readings
            .retain(|&(_, at)| now.saturating_duration_since(at) <= horizon);

        if self.readings.is_empty() {
            return None;
        }
        let sum: f64 = self.readings.iter().map(|&(f, _)| f64::from(f)).sum();
        Some((sum / self.readings.len() as f64) as f32)
    }

    pub fn reset(&mut self) {
        self.readings.clear();
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
