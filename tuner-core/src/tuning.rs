//! # Musical Tuning Module
//!
//! Converts detected frequencies into musical terms: a note value on the
//! MIDI scale, a note name in scientific pitch notation and a deviation in
//! cents, all relative to a configurable A4 tuning standard.
//!
//! ## Features
//! - Equal temperament note values (A4 = note 69)
//! - Note name formatting and parsing ("C#4", "Bb2")
//! - Cent deviation calculations for tuning accuracy
//! - Nearest-note readings for display layers

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

/// Standard concert pitch for A4 in Hz.
pub const DEFAULT_A4: f64 = 440.0;

/// Note value of A4 on the MIDI scale.
pub const A4_NOTE: i32 = 69;

/// A reading counts as in tune within this many cents of the target.
pub const IN_TUNE_CENTS: f64 = 10.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Static map from pitch-class names (sharps and flats) to semitones above C.
static NOTE_TO_SEMITONE: Lazy<BTreeMap<&'static str, i32>> = Lazy::new(|| {
    const FLATS: [(&str, i32); 7] = [
        ("Db", 1),
        ("Eb", 3),
        ("Fb", 4),
        ("Gb", 6),
        ("Ab", 8),
        ("Bb", 10),
        ("Cb", -1),
    ];
    NOTE_NAMES
        .iter()
        .enumerate()
        .map(|(i, &name)| (name, i as i32))
        .chain(FLATS)
        .collect()
});

/// Calculates the (un-rounded) note value of a frequency.
///
/// # Arguments
/// * `freq` - Input frequency in Hz
/// * `a4` - Frequency of A4 in Hz
///
/// # Returns
/// * Note value where 69.0 is A4, or 0.0 for non-positive input
pub fn note_value(freq: f64, a4: f64) -> f64 {
    if freq <= 0.0 || a4 <= 0.0 {
        return 0.0;
    }
    A4_NOTE as f64 + 12.0 * (freq / a4).log2()
}

/// Equal temperament frequency of a (possibly fractional) note value.
pub fn note_frequency(note: f64, a4: f64) -> f64 {
    a4 * 2f64.powf((note - A4_NOTE as f64) / 12.0)
}

/// Name of a note value including its octave, e.g. 61 -> "C#4".
pub fn note_name(note: i32) -> String {
    let pitch_class = note.rem_euclid(12) as usize;
    let octave = note.div_euclid(12) - 1;
    format!("{}{}", NOTE_NAMES[pitch_class], octave)
}

/// Parses a note name with octave ("A4", "C#3", "Bb2") into its note value.
///
/// # Returns
/// * `Some(note)` - Note value (A4 = 69)
/// * `None` - Unknown pitch class or missing octave
pub fn parse_note_name(name: &str) -> Option<i32> {
    let name = name.trim();
    let split = name.find(|c: char| c.is_ascii_digit() || c == '-')?;
    let (pitch, octave) = name.split_at(split);
    let semitone = *NOTE_TO_SEMITONE.get(pitch)?;
    let octave: i32 = octave.parse().ok()?;
    Some((octave + 1) * 12 + semitone)
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// The nearest note to a detected frequency and how far off it is.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReading {
    /// Detected frequency in Hz.
    pub frequency: f64,
    /// Nearest note value (A4 = 69).
    pub note: i32,
    /// Name of the nearest note, e.g. "A4".
    pub name: String,
    /// Deviation from the nearest note, -50 to +50 cents.
    pub cents: f64,
}

impl NoteReading {
    /// Builds a reading for `freq`, or `None` when no pitch was detected.
    pub fn from_frequency(freq: f64, a4: f64) -> Option<Self> {
        if !(freq > 0.0) || !freq.is_finite() || a4 <= 0.0 {
            return None;
        }
        let value = note_value(freq, a4);
        let note = value.round() as i32;
        Some(Self {
            frequency: freq,
            note,
            name: note_name(note),
            cents: (value - note as f64) * 100.0,
        })
    }

    pub fn in_tune(&self) -> bool {
        self.cents.abs() <= IN_TUNE_CENTS
    }

    /// Cents formatted for display, e.g. "+7" or "-12".
    pub fn cents_label(&self) -> String {
        let cents = self.cents.round() as i32;
        if cents > 0 {
            format!("+{cents}")
        } else {
            format!("{cents}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_note_69() {
        assert!((note_value(440.0, DEFAULT_A4) - 69.0).abs() < 1e-9);
        assert!((note_value(880.0, DEFAULT_A4) - 81.0).abs() < 1e-9);
        assert_eq!(note_value(0.0, DEFAULT_A4), 0.0);
        assert_eq!(note_value(-5.0, DEFAULT_A4), 0.0);
    }

    #[test]
    fn tuning_standard_shifts_note_values() {
        assert!((note_value(432.0, 432.0) - 69.0).abs() < 1e-9);
        assert!((note_frequency(69.0, 442.0) - 442.0).abs() < 1e-9);
        assert!((note_frequency(60.0, DEFAULT_A4) - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(note_name(69), "A4");
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(61), "C#4");
        assert_eq!(note_name(21), "A0");
        assert_eq!(parse_note_name("A4"), Some(69));
        assert_eq!(parse_note_name("C#3"), Some(49));
        assert_eq!(parse_note_name("Bb2"), Some(46));
        assert_eq!(parse_note_name("H2"), None);
        assert_eq!(parse_note_name("C"), None);
    }

    #[test]
    fn cents_between_semitones() {
        let semitone_up = 440.0 * 2f64.powf(1.0 / 12.0);
        assert!((cents_deviation(semitone_up, 440.0) - 100.0).abs() < 1e-9);
        assert!((cents_deviation(440.0, 880.0) + 1200.0).abs() < 1e-9);
    }

    #[test]
    fn reading_picks_nearest_note() {
        // 10 cents sharp of A3
        let freq = 220.0 * 2f64.powf(10.0 / 1200.0);
        let reading = NoteReading::from_frequency(freq, DEFAULT_A4).unwrap();
        assert_eq!(reading.name, "A3");
        assert_eq!(reading.note, 57);
        assert!((reading.cents - 10.0).abs() < 1e-6);
        assert_eq!(reading.cents_label(), "+10");

        let flat = NoteReading::from_frequency(220.0 * 2f64.powf(-30.0 / 1200.0), DEFAULT_A4).unwrap();
        assert!(!flat.in_tune());
        assert_eq!(flat.cents_label(), "-30");
    }

    #[test]
    fn no_reading_for_silence() {
        assert!(NoteReading::from_frequency(0.0, DEFAULT_A4).is_none());
        assert!(NoteReading::from_frequency(f64::NAN, DEFAULT_A4).is_none());
    }
}
