//! # Musical Tuning Module
//!
//! This module provides the musical side of the tuner: cent deviation from a
//! target frequency and the nearest equal-tempered note for a frequency.
//!
//! ## Features
//! - Equal temperament with A4 = 440 Hz (MIDI note 69)
//! - Cent deviation calculations for tuning accuracy
//! - Nearest note name and octave in sharp notation
//! - Note name to frequency conversions

use serde::Serialize;
use std::fmt;

/// Pitch classes in sharp notation, starting at C.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Reference pitch for equal temperament.
pub const A4_FREQUENCY: f32 = 440.0;
pub const A4_MIDI: i32 = 69;

/// Visual indicators show at most a semitone either way.
pub const DISPLAY_CENTS_LIMIT: f32 = 100.0;

/// An equal-tempered note, e.g. `A4` or `C#3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Note {
    pub name: &'static str,
    pub octave: i32,
    pub midi: i32,
}

impl Note {
    pub fn from_midi(midi: i32) -> Self {
        Self {
            name: NOTE_NAMES[midi.rem_euclid(12) as usize],
            octave: midi.div_euclid(12) - 1,
            midi,
        }
    }

    /// Equal-tempered frequency of this note.
    pub fn frequency(&self) -> f32 {
        midi_to_frequency(self.midi)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.octave)
    }
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// # Returns
/// * `Some(cents)` - Unclamped deviation
/// * `None` - Either frequency is not a positive number
pub fn cents_offset(freq: f32, target_freq: f32) -> Option<f32> {
    if is_positive(freq) && is_positive(target_freq) {
        Some(1200.0 * (freq / target_freq).log2())
    } else {
        None
    }
}

/// Clamps a cent deviation to the range a bounded indicator can show.
pub fn clamp_cents_for_display(cents: f32) -> f32 {
    cents.clamp(-DISPLAY_CENTS_LIMIT, DISPLAY_CENTS_LIMIT)
}

/// Finds the closest equal-tempered note to a given frequency.
pub fn nearest_note(freq: f32) -> Option<Note> {
    if !is_positive(freq) {
        return None;
    }
    let semitones_from_a4 = 12.0 * (f64::from(freq) / f64::from(A4_FREQUENCY)).log2();
    let midi = (f64::from(A4_MIDI) + semitones_from_a4).round() as i32;
    Some(Note::from_midi(midi))
}

/// Equal-tempered frequency of a MIDI note number.
pub fn midi_to_frequency(midi: i32) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi - A4_MIDI) as f32 / 12.0)
}

/// Highest MIDI note number (G9).
pub const MAX_MIDI: i32 = 127;

/// Parses a note label such as `A4`, `c#3`, `Bb2` or `C-1`.
///
/// Flats are accepted and normalized to the sharp spelling. Labels outside
/// the MIDI range `C-1..=G9` are rejected.
pub fn note_from_name(label: &str) -> Option<Note> {
    let mut chars = label.trim().chars();
    let pitch_class = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let (accidental, octave) = match rest.chars().next()? {
        '#' => (1, &rest[1..]),
        'b' => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().ok()?;
    let midi = octave
        .checked_add(1)?
        .checked_mul(12)?
        .checked_add(pitch_class + accidental)?;
    (0..=MAX_MIDI).contains(&midi).then(|| Note::from_midi(midi))
}

fn is_positive(freq: f32) -> bool {
    freq.is_finite() && freq > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn semitone_is_one_hundred_cents() {
        assert_abs_diff_eq!(cents_offset(466.16, 440.0).unwrap(), 100.0, epsilon = 0.05);
        assert_abs_diff_eq!(cents_offset(440.0, 440.0).unwrap(), 0.0);
        assert_abs_diff_eq!(cents_offset(220.0, 440.0).unwrap(), -1200.0, epsilon = 1e-3);
    }

    #[test]
    fn cents_undefined_without_positive_inputs() {
        assert_eq!(cents_offset(0.0, 440.0), None);
        assert_eq!(cents_offset(440.0, 0.0), None);
        assert_eq!(cents_offset(-440.0, 440.0), None);
        assert_eq!(cents_offset(f32::NAN, 440.0), None);
    }

    #[test]
    fn display_cents_are_clamped() {
        assert_eq!(clamp_cents_for_display(1200.0), 100.0);
        assert_eq!(clamp_cents_for_display(-250.0), -100.0);
        assert_eq!(clamp_cents_for_display(12.5), 12.5);
    }

    #[test]
    fn nearest_note_names() {
        let a4 = nearest_note(440.0).unwrap();
        assert_eq!((a4.name, a4.octave, a4.midi), ("A", 4, 69));

        let c4 = nearest_note(261.63).unwrap();
        assert_eq!((c4.name, c4.octave), ("C", 4));

        assert_eq!(nearest_note(466.16).unwrap().to_string(), "A#4");
        assert_eq!(nearest_note(27.5).unwrap().to_string(), "A0");
        // 8.18 Hz is MIDI 0.
        assert_eq!(nearest_note(8.18).unwrap().to_string(), "C-1");
    }

    #[test]
    fn quarter_tone_rounds_to_nearest() {
        // 20 cents sharp of A4 still reads A4; 60 cents sharp reads A#4.
        assert_eq!(nearest_note(440.0 * 2f32.powf(0.2 / 12.0)).unwrap().to_string(), "A4");
        assert_eq!(nearest_note(440.0 * 2f32.powf(0.6 / 12.0)).unwrap().to_string(), "A#4");
    }

    #[test]
    fn no_note_without_pitch() {
        assert_eq!(nearest_note(0.0), None);
        assert_eq!(nearest_note(-1.0), None);
    }

    #[test]
    fn parses_note_labels() {
        assert_eq!(note_from_name("A4").unwrap().midi, 69);
        assert_eq!(note_from_name("c#3").unwrap().to_string(), "C#3");
        assert_eq!(note_from_name("Bb2").unwrap().to_string(), "A#2");
        assert_eq!(note_from_name("C-1").unwrap().midi, 0);
        assert_eq!(note_from_name("G9").unwrap().midi, MAX_MIDI);
        assert_abs_diff_eq!(note_from_name("A4").unwrap().frequency(), 440.0, epsilon = 1e-3);
        assert_abs_diff_eq!(note_from_name("C4").unwrap().frequency(), 261.63, epsilon = 0.01);
    }

    #[test]
    fn rejects_malformed_labels() {
        for label in ["", "H2", "A", "A#", "440", "Ax4", "Cb-1", "G#9", "C200000000", "C357913941", "C-2147483648"] {
            assert_eq!(note_from_name(label), None, "{label:?}");
        }
    }
}
