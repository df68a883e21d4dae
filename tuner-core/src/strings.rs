//! Guitar string tables.
//!
//! Strings are numbered the way players count them: string 1 is the highest
//! (thinnest) string and string 6 the lowest. Tunings are written low to high,
//! e.g. `["E2", "A2", "D3", "G3", "B3", "E4"]`.

use crate::error::ConfigError;
use crate::tuning::{self, NoteName};

pub const STRING_COUNT: usize = 6;

/// Highest fret considered when looking up fretted positions.
pub const DEFAULT_FRET_COUNT: u8 = 20;

pub const STANDARD_TUNING: [&str; STRING_COUNT] = ["E2", "A2", "D3", "G3", "B3", "E4"];

/// One open string of a tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenString {
    pub note: NoteName,
    pub octave: i32,
    pub frequency: f32,
}

/// A fretted position. `string_index` is 1..=6, `fret` 0 is the open string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringPosition {
    pub string_index: u8,
    pub fret: u8,
}

/// Result of matching a frequency against the open strings only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenStringMatch {
    pub string_index: u8,
    pub open: OpenString,
    pub cents_deviation: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringTuning {
    /// Indexed by `string_index - 1`.
    strings: [OpenString; STRING_COUNT],
    fret_count: u8,
}

impl Default for StringTuning {
    fn default() -> Self {
        Self::standard()
    }
}

impl StringTuning {
    /// Standard tuning, E2 A2 D3 G3 B3 E4.
    pub fn standard() -> Self {
        let mut strings = [OpenString {
            note: NoteName::E,
            octave: 2,
            frequency: 0.0,
        }; STRING_COUNT];
        for (i, name) in STANDARD_TUNING.iter().rev().enumerate() {
            // The table is a constant, every entry parses.
            let (note, octave) = tuning::parse_note(name).unwrap_or((NoteName::E, 2));
            strings[i] = open_string(note, octave);
        }
        Self {
            strings,
            fret_count: DEFAULT_FRET_COUNT,
        }
    }

    /// Builds a tuning from six note names written low string first.
    pub fn from_note_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        if names.len() != STRING_COUNT {
            return Err(ConfigError::InvalidNote(format!(
                "expected {} strings, got {}",
                STRING_COUNT,
                names.len()
            )));
        }
        let mut tuning = Self::standard();
        for (i, name) in names.iter().rev().enumerate() {
            let name = name.as_ref();
            let (note, octave) = tuning::parse_note(name)
                .ok_or_else(|| ConfigError::InvalidNote(name.to_string()))?;
            tuning.strings[i] = open_string(note, octave);
        }
        Ok(tuning)
    }

    pub fn with_fret_count(mut self, fret_count: u8) -> Self {
        self.fret_count = fret_count;
        self
    }

    pub fn fret_count(&self) -> u8 {
        self.fret_count
    }

    pub fn string(&self, string_index: u8) -> Option<&OpenString> {
        (string_index as usize)
            .checked_sub(1)
            .and_then(|i| self.strings.get(i))
    }

    /// Open strings with their numbers, string 1 first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u8, &OpenString)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| ((i + 1) as u8, s))
    }

    /// Strings 1 and 2, the two highest strings of the instrument.
    pub fn is_high_string(string_index: u8) -> bool {
        string_index == 1 || string_index == 2
    }
}

fn open_string(note: NoteName, octave: i32) -> OpenString {
    OpenString {
        note,
        octave,
        frequency: tuning::note_frequency(note, octave),
    }
}

/// Finds the open string whose reference frequency is nearest to `freq`.
///
/// Distance is the absolute difference in Hz, not in cents. Ties go to the
/// lower-pitched string.
pub fn nearest_open_string(freq: f32, tuning: &StringTuning) -> Option<OpenStringMatch> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let mut best: Option<(u8, &OpenString)> = None;
    for (index, open) in tuning.iter().rev() {
        let better = match best {
            Some((_, current)) => (open.frequency - freq).abs() < (current.frequency - freq).abs(),
            None => true,
        };
        if better {
            best = Some((index, open));
        }
    }
    best.map(|(string_index, open)| OpenStringMatch {
        string_index,
        open: *open,
        cents_deviation: tuning::calculate_cents_deviation(freq, open.frequency),
    })
}

/// Every position on the fretboard that sounds exactly `note` in `octave`,
/// string 1 first.
pub fn string_positions(
    note: NoteName,
    octave: i32,
    tuning: &StringTuning,
) -> Vec<StringPosition> {
    let target = tuning::semitones_from_a4(note, octave);
    tuning
        .iter()
        .filter_map(|(string_index, open)| {
            let fret = target - tuning::semitones_from_a4(open.note, open.octave);
            (0..=tuning.fret_count as i32)
                .contains(&fret)
                .then_some(StringPosition {
                    string_index,
                    fret: fret as u8,
                })
        })
        .collect()
}

/// Every position that sounds the pitch class `note` in any octave.
pub fn positions_for_note_name(note: NoteName, tuning: &StringTuning) -> Vec<StringPosition> {
    let mut positions = Vec::new();
    for (string_index, open) in tuning.iter() {
        for fret in 0..=tuning.fret_count {
            if NoteName::from_index(open.note.index() + fret as i32) == note {
                positions.push(StringPosition { string_index, fret });
            }
        }
    }
    positions
}

/// Maps a frequency to the fretted position whose pitch is nearest in Hz.
///
/// The same pitch is often playable on several strings; those ties go to the
/// lowest fret. Use [`string_positions`] to get all of them.
pub fn map_to_nearest_string(freq: f32, tuning: &StringTuning) -> Option<StringPosition> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }
    let mut best: Option<(f32, StringPosition)> = None;
    for (string_index, open) in tuning.iter() {
        let open_semitones = tuning::semitones_from_a4(open.note, open.octave);
        for fret in 0..=tuning.fret_count {
            let fretted = tuning::frequency_from_semitones(open_semitones + fret as i32);
            let distance = (fretted - freq).abs();
            let position = StringPosition { string_index, fret };
            best = match best {
                Some((d, current))
                    if d < distance || (d == distance && current.fret <= fret) =>
                {
                    Some((d, current))
                }
                _ => Some((distance, position)),
            };
        }
    }
    best.map(|(_, position)| position)
}
