//! # Musical Tuning Module
//!
//! This module maps frequencies onto the 12-tone equal-tempered scale anchored
//! at A4 = 440 Hz. It is the "note mapper" of the tuner: every function here is
//! pure and recomputes its result from the input alone.
//!
//! ## Features
//! - Nearest chromatic note, octave and reference frequency for any frequency
//! - Cent deviation calculations for tuning accuracy
//! - Note name parsing (`"A4"`, `"C#3"`, `"Bb2"`) and note to frequency lookups

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Concert pitch the chromatic table is anchored at.
pub const A4_FREQUENCY: f32 = 440.0;

/// The twelve pitch classes, in ascending order starting at C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NoteName {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl NoteName {
    pub const ALL: [NoteName; 12] = [
        NoteName::C,
        NoteName::CSharp,
        NoteName::D,
        NoteName::DSharp,
        NoteName::E,
        NoteName::F,
        NoteName::FSharp,
        NoteName::G,
        NoteName::GSharp,
        NoteName::A,
        NoteName::ASharp,
        NoteName::B,
    ];

    /// Pitch class for a chromatic index, wrapping negative indices.
    pub fn from_index(index: i32) -> Self {
        Self::ALL[index.rem_euclid(12) as usize]
    }

    /// Position of the pitch class within the octave (C = 0, B = 11).
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoteName::C => "C",
            NoteName::CSharp => "C#",
            NoteName::D => "D",
            NoteName::DSharp => "D#",
            NoteName::E => "E",
            NoteName::F => "F",
            NoteName::FSharp => "F#",
            NoteName::G => "G",
            NoteName::GSharp => "G#",
            NoteName::A => "A",
            NoteName::ASharp => "A#",
            NoteName::B => "B",
        }
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nearest equal-tempered note for a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteMapping {
    pub note: NoteName,
    pub octave: i32,
    /// Exact equal-tempered frequency of `note` in `octave`.
    pub reference_frequency: f32,
    /// Deviation of the input from `reference_frequency`; positive is sharp.
    pub cents_deviation: f32,
}

impl NoteMapping {
    /// True when both mappings name the same note in the same octave.
    pub fn same_pitch(&self, other: &NoteMapping) -> bool {
        self.note == other.note && self.octave == other.octave
    }

    /// Signed distance from A4 in semitones.
    pub fn semitones_from_a4(&self) -> i32 {
        semitones_from_a4(self.note, self.octave)
    }
}

impl fmt::Display for NoteMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.note, self.octave)
    }
}

/// Lookup table from every accepted spelling of a note (sharps and flats,
/// octaves 0 to 8) to its distance from A4 in semitones.
static NOTE_MAP: Lazy<BTreeMap<String, i32>> = Lazy::new(|| {
    const FLAT_SPELLINGS: [(NoteName, &str); 5] = [
        (NoteName::CSharp, "Db"),
        (NoteName::DSharp, "Eb"),
        (NoteName::FSharp, "Gb"),
        (NoteName::GSharp, "Ab"),
        (NoteName::ASharp, "Bb"),
    ];
    let mut map = BTreeMap::new();
    for octave in 0..=8 {
        for note in NoteName::ALL {
            map.insert(format!("{}{}", note, octave), semitones_from_a4(note, octave));
        }
        for (note, flat) in FLAT_SPELLINGS {
            map.insert(format!("{}{}", flat, octave), semitones_from_a4(note, octave));
        }
    }
    map
});

/// Signed distance of a note from A4 in semitones.
pub fn semitones_from_a4(note: NoteName, octave: i32) -> i32 {
    (octave - 4) * 12 + note.index() - NoteName::A.index()
}

/// Equal-tempered frequency of a note.
pub fn note_frequency(note: NoteName, octave: i32) -> f32 {
    frequency_from_semitones(semitones_from_a4(note, octave))
}

/// Equal-tempered frequency `semitones` away from A4.
pub fn frequency_from_semitones(semitones: i32) -> f32 {
    (A4_FREQUENCY as f64 * 2.0_f64.powf(semitones as f64 / 12.0)) as f32
}

/// Parses a note name such as `"A4"`, `"C#3"` or `"Bb2"`.
///
/// Returns `None` for anything outside octaves 0 to 8 or with an unknown
/// spelling.
pub fn parse_note(name: &str) -> Option<(NoteName, i32)> {
    let semitones = *NOTE_MAP.get(name.trim())?;
    let shifted = semitones + NoteName::A.index();
    Some((NoteName::from_index(shifted), 4 + shifted.div_euclid(12)))
}

/// Maps a frequency to the nearest equal-tempered note.
///
/// The note is chosen by rounding the semitone distance from A4, so the
/// result is always the closest pitch by cents. Zero, negative and
/// non-finite input has no note and yields `None`.
pub fn map_frequency(freq: f32) -> Option<NoteMapping> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }

    let semitone_offset = 12.0 * (freq as f64 / A4_FREQUENCY as f64).log2();
    let rounded = semitone_offset.round() as i32;
    let shifted = rounded + NoteName::A.index();

    let reference = A4_FREQUENCY as f64 * 2.0_f64.powf(rounded as f64 / 12.0);
    let cents = 1200.0 * (freq as f64 / reference).log2();

    Some(NoteMapping {
        note: NoteName::from_index(shifted),
        octave: 4 + shifted.div_euclid(12),
        reference_frequency: reference as f32,
        cents_deviation: cents as f32,
    })
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// Returns 0 when either frequency is not a positive number.
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    if !(freq > 0.0 && target_freq > 0.0) {
        return 0.0;
    }
    (1200.0 * (freq as f64 / target_freq as f64).log2()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn concert_a_maps_to_a4() {
        let mapping = map_frequency(440.0).unwrap();
        assert_eq!(mapping.note, NoteName::A);
        assert_eq!(mapping.octave, 4);
        assert_eq!(mapping.reference_frequency, 440.0);
        assert!(mapping.cents_deviation.abs() < 0.01);
    }

    #[test]
    fn low_e_string_maps_to_e2() {
        let mapping = map_frequency(82.41).unwrap();
        assert_eq!(mapping.note, NoteName::E);
        assert_eq!(mapping.octave, 2);
        assert!(mapping.cents_deviation.abs() < 0.5);
    }

    #[test]
    fn one_semitone_above_a4_is_a_sharp() {
        let mapping = map_frequency(440.0 * 2.0_f32.powf(1.0 / 12.0)).unwrap();
        assert_eq!(mapping.note, NoteName::ASharp);
        assert_eq!(mapping.octave, 4);
        assert!(mapping.cents_deviation.abs() < 0.01);
    }

    #[test]
    fn octave_changes_at_c() {
        assert_eq!(map_frequency(261.63).unwrap().to_string(), "C4");
        assert_eq!(map_frequency(246.94).unwrap().to_string(), "B3");
        assert_eq!(map_frequency(27.5).unwrap().to_string(), "A0");
        assert_eq!(map_frequency(4186.01).unwrap().to_string(), "C8");
    }

    #[test]
    fn cents_sign_follows_direction() {
        let sharp = map_frequency(442.0).unwrap();
        assert_eq!(sharp.note, NoteName::A);
        assert_abs_diff_eq!(sharp.cents_deviation, 7.85, epsilon = 0.05);

        let flat = map_frequency(432.0).unwrap();
        assert_eq!(flat.note, NoteName::A);
        assert_abs_diff_eq!(flat.cents_deviation, -31.77, epsilon = 0.05);
    }

    #[test]
    fn cents_stay_within_half_a_semitone() {
        let mut freq = 30.0_f32;
        while freq < 2000.0 {
            let mapping = map_frequency(freq).unwrap();
            assert!(mapping.cents_deviation > -50.01 && mapping.cents_deviation <= 50.01);
            freq *= 1.013;
        }
    }

    #[test]
    fn degenerate_input_has_no_note() {
        assert!(map_frequency(0.0).is_none());
        assert!(map_frequency(-110.0).is_none());
        assert!(map_frequency(f32::NAN).is_none());
        assert!(map_frequency(f32::INFINITY).is_none());
    }

    #[test]
    fn mapping_is_repeatable() {
        let a = map_frequency(196.3).unwrap();
        let b = map_frequency(196.3).unwrap();
        assert_eq!(a.cents_deviation.to_bits(), b.cents_deviation.to_bits());
        assert_eq!(a.reference_frequency.to_bits(), b.reference_frequency.to_bits());
        assert_eq!(a, b);
    }

    #[test]
    fn parses_sharps_and_flats() {
        assert_eq!(parse_note("A4"), Some((NoteName::A, 4)));
        assert_eq!(parse_note("C#3"), Some((NoteName::CSharp, 3)));
        assert_eq!(parse_note("Bb2"), Some((NoteName::ASharp, 2)));
        assert_eq!(parse_note("C0"), Some((NoteName::C, 0)));
        assert_eq!(parse_note("H2"), None);
        assert_eq!(parse_note("E9"), None);
    }

    #[test]
    fn note_frequencies_match_standard_tuning() {
        assert_abs_diff_eq!(note_frequency(NoteName::E, 2), 82.4069, epsilon = 0.001);
        assert_abs_diff_eq!(note_frequency(NoteName::E, 4), 329.6276, epsilon = 0.001);
        assert_eq!(note_frequency(NoteName::A, 4), 440.0);
    }

    #[test]
    fn cents_deviation_helper() {
        assert_abs_diff_eq!(calculate_cents_deviation(880.0, 440.0), 1200.0, epsilon = 1e-3);
        assert_abs_diff_eq!(calculate_cents_deviation(440.0, 880.0), -1200.0, epsilon = 1e-3);
        assert_eq!(calculate_cents_deviation(0.0, 440.0), 0.0);
    }
}
