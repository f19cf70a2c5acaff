//! # Pitch Detection Module
//!
//! This module implements the fundamental frequency estimator used by the tuner.
//! It works directly on the time-domain frame using autocorrelation, which keeps
//! latency low for single-note tuning.
//!
//! ## Features
//! - Autocorrelation over an admissible lag range (default 50 Hz to 2000 Hz)
//! - Energy gate to filter out silence
//! - Parabolic interpolation for sub-sample accuracy
//! - Nyquist guard on the final estimate

use crate::audio::AudioFrame;
use crate::config::TunerConfig;

/// Autocorrelation pitch detector with a fixed admissible frequency range.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchDetector {
    min_hz: f32,
    max_hz: f32,
    silence_energy: f64,
}

impl PitchDetector {
    pub fn new(min_hz: f32, max_hz: f32, silence_energy: f64) -> Self {
        Self {
            min_hz,
            max_hz,
            silence_energy,
        }
    }

    pub fn from_config(config: &TunerConfig) -> Self {
        Self::new(
            config.min_detectable_hz,
            config.max_detectable_hz,
            config.silence_energy,
        )
    }

    /// Estimates the fundamental frequency of one frame.
    ///
    /// The frame's own sample count is used as the frame length, so a
    /// partially filled frame is analysed as-is.
    pub fn detect(&self, frame: &AudioFrame) -> Option<f32> {
        detect_pitch_autocorrelation(
            &frame.samples,
            frame.sample_rate,
            self.min_hz,
            self.max_hz,
            self.silence_energy,
        )
    }
}

/// Returns the inclusive `(min_lag, max_lag)` range searched for a frame of
/// `len` samples, or `None` when the frame cannot hold a single admissible lag.
pub fn lag_bounds(len: usize, sample_rate: u32, min_hz: f32, max_hz: f32) -> Option<(usize, usize)> {
    if len < 2 || sample_rate == 0 {
        return None;
    }
    let sr = sample_rate as f32;
    let min_lag = ((sr / max_hz) as usize).max(1);
    let max_lag = ((sr / min_hz) as usize).min(len - 1);
    (min_lag <= max_lag).then_some((min_lag, max_lag))
}

/// Estimates pitch using normalized autocorrelation with parabolic refinement.
///
/// Every lag is normalized by the same total frame energy, so the ranking of
/// lags is that of the raw correlation. Ties keep the smallest lag, which
/// favours the higher of two equally strong candidates.
///
/// # Arguments
/// * `signal` - Mono samples in `[-1, 1]`
/// * `sample_rate` - Sample rate in Hz
/// * `min_hz` / `max_hz` - Admissible pitch range
/// * `silence_energy` - Frames with total energy at or below this are silent
///
/// # Returns
/// * `Some(frequency)` - Detected frequency in Hz, within `(0, sample_rate / 2]`
/// * `None` - No pitch detected (silence, too short, or out of range)
pub fn detect_pitch_autocorrelation(
    signal: &[f32],
    sample_rate: u32,
    min_hz: f32,
    max_hz: f32,
    silence_energy: f64,
) -> Option<f32> {
    let (min_lag, max_lag) = lag_bounds(signal.len(), sample_rate, min_hz, max_hz)?;

    // --- Energy gate: silence has no pitch ---
    let energy: f64 = signal.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    if energy <= silence_energy {
        return None;
    }

    // --- Correlation over the admissible lag range ---
    let correlations: Vec<f64> = (min_lag..=max_lag)
        .map(|lag| autocorrelation(signal, lag))
        .collect();

    let mut best_corr = f64::NEG_INFINITY;
    let mut best_index = None;
    for (index, &corr) in correlations.iter().enumerate() {
        let normalized = corr / energy;
        if normalized > best_corr {
            best_corr = normalized;
            best_index = Some(index);
        }
    }
    let best_index = best_index?;
    let best_lag = min_lag + best_index;
    if best_lag == 0 {
        return None;
    }

    // --- Parabolic interpolation, interior lags only ---
    let refined_lag = best_lag as f64 + refine_peak_offset(&correlations, best_index);

    let sr = f64::from(sample_rate);
    let frequency = sr / refined_lag;
    if !frequency.is_finite() || frequency <= 0.0 || frequency > sr / 2.0 {
        return None;
    }
    Some(frequency as f32)
}

/// Unnormalized autocorrelation `Σ x[i]·x[i+lag]` over the overlapping region.
pub fn autocorrelation(signal: &[f32], lag: usize) -> f64 {
    if lag >= signal.len() {
        return 0.0;
    }
    signal
        .iter()
        .zip(&signal[lag..])
        .map(|(&a, &b)| f64::from(a) * f64::from(b))
        .sum()
}

/// Sub-sample offset of the peak at `index` from a parabola through its neighbours.
///
/// Returns `0.0` when the peak sits on either end of `values` or when the
/// parabola is too flat to locate a vertex.
pub fn refine_peak_offset(values: &[f64], index: usize) -> f64 {
    if index == 0 || index + 1 >= values.len() {
        return 0.0;
    }
    let (y1, y2, y3) = (values[index - 1], values[index], values[index + 1]);
    let denom = y1 - 2.0 * y2 + y3;
    if denom.abs() < 1e-12 {
        return 0.0;
    }
    0.5 * (y1 - y3) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: u32 = 44100;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn detector() -> PitchDetector {
        PitchDetector::from_config(&TunerConfig::default())
    }

    #[test]
    fn silence_has_no_pitch() {
        let frame = AudioFrame::new(vec![0.0; 4096], SR);
        assert_eq!(detector().detect(&frame), None);
    }

    #[test]
    fn near_silence_is_gated() {
        let frame = AudioFrame::new(sine(440.0, 4096).iter().map(|s| s * 2e-6).collect(), SR);
        assert_eq!(detector().detect(&frame), None);
    }

    #[test]
    fn sinusoids_within_one_percent() {
        for freq in [220.0, 330.0, 440.0, 660.0, 880.0, 1000.0, 1500.0] {
            let frame = AudioFrame::new(sine(freq, 4096), SR);
            let detected = detector().detect(&frame).expect("pitch expected");
            assert_relative_eq!(detected, freq, max_relative = 0.01);
        }
    }

    #[test]
    fn low_notes_need_longer_frames() {
        for freq in [100.0, 110.0] {
            let frame = AudioFrame::new(sine(freq, 16384), SR);
            let detected = detector().detect(&frame).expect("pitch expected");
            assert_relative_eq!(detected, freq, max_relative = 0.01);
        }
    }

    #[test]
    fn refined_estimate_beats_integer_lag() {
        // 440 Hz has a period of ~100.23 samples; the integer lag alone gives 441 Hz.
        let frame = AudioFrame::new(sine(440.0, 4096), SR);
        let detected = detector().detect(&frame).unwrap();
        assert!((detected - 440.0).abs() < 0.5, "got {detected}");
    }

    #[test]
    fn partial_frame_is_analysed_as_delivered() {
        let frame = AudioFrame::new(sine(440.0, 2048), SR);
        let detected = detector().detect(&frame).unwrap();
        assert_relative_eq!(detected, 440.0, max_relative = 0.01);
    }

    #[test]
    fn frame_shorter_than_min_lag_has_no_pitch() {
        let frame = AudioFrame::new(sine(440.0, 10), SR);
        assert_eq!(detector().detect(&frame), None);
        assert_eq!(detector().detect(&AudioFrame::new(Vec::new(), SR)), None);
    }

    #[test]
    fn best_lag_on_range_edge_is_not_refined() {
        // In a 4096 frame a 100 Hz tone correlates most strongly at the smallest
        // admissible lag (22), which is returned exactly.
        let frame = AudioFrame::new(sine(100.0, 4096), SR);
        let detected = detector().detect(&frame).unwrap();
        assert_relative_eq!(detected, SR as f32 / 22.0, max_relative = 1e-6);
    }

    #[test]
    fn estimates_never_leave_nyquist_range() {
        let mut state: u32 = 0x1234_5678;
        let noise: Vec<f32> = (0..4096)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
            })
            .collect();
        let square: Vec<f32> = sine(330.0, 4096).iter().map(|s| s.signum() * 0.8).collect();
        let signals = [noise, square, sine(5000.0, 4096), sine(20.0, 4096)];
        for signal in signals {
            if let Some(freq) = detector().detect(&AudioFrame::new(signal, SR)) {
                assert!(freq > 0.0 && freq <= SR as f32 / 2.0, "out of range: {freq}");
            }
        }
    }

    #[test]
    fn lag_bounds_follow_range_and_length() {
        assert_eq!(lag_bounds(4096, SR, 50.0, 2000.0), Some((22, 882)));
        assert_eq!(lag_bounds(500, SR, 50.0, 2000.0), Some((22, 499)));
        assert_eq!(lag_bounds(20, SR, 50.0, 2000.0), None);
        assert_eq!(lag_bounds(1, SR, 50.0, 2000.0), None);
    }

    #[test]
    fn refinement_only_for_interior_peaks() {
        let values = [1.0, 0.5, 0.2];
        assert_eq!(refine_peak_offset(&values, 0), 0.0);
        let values = [0.2, 0.5, 1.0];
        assert_eq!(refine_peak_offset(&values, 2), 0.0);

        let values = [0.5, 1.0, 0.7];
        let offset = refine_peak_offset(&values, 1);
        assert!(offset > 0.0 && offset < 0.5, "got {offset}");
    }

    #[test]
    fn flat_parabola_keeps_integer_lag() {
        assert_eq!(refine_peak_offset(&[1.0, 1.0, 1.0], 1), 0.0);
    }

    #[test]
    fn autocorrelation_at_zero_lag_is_energy() {
        let signal = [0.5, -0.5, 0.25];
        assert_relative_eq!(autocorrelation(&signal, 0), 0.5625);
        assert_eq!(autocorrelation(&signal, 3), 0.0);
    }
}
