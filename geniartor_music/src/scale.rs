// Scale and pitch-name support.
//
// A piece lives in one diatonic scale: a tonic pitch class plus a scale type.
// Besides major and the two minors, the church modes are available since
// they are just other rotations of the same seven-note pattern.
//
// This module provides:
// - Scale membership, scale degrees (1-7) and "position in degrees", a
//   monotone index over all scale pitches used for interval arithmetic in
//   scale steps (parallel intervals, narrow-range detection)
// - The list of scale pitches inside a tessitura (re-pitch candidates)
// - Note-name parsing and formatting in MIDI numbering (C4 = 60)
//
// Used by piece.rs (scale context of a piece), neighborhood.rs (re-pitch
// candidates), draft.rs (initial pitches) and scoring.rs.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Supported scale types, each defined by its interval pattern from the tonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    Major,
    NaturalMinor,
    HarmonicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
}

impl ScaleType {
    /// Semitone offsets from the tonic to degrees 1-7.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            ScaleType::Major => [0, 2, 4, 5, 7, 9, 11],
            ScaleType::NaturalMinor => [0, 2, 3, 5, 7, 8, 10],
            ScaleType::HarmonicMinor => [0, 2, 3, 5, 7, 8, 11],
            ScaleType::Dorian => [0, 2, 3, 5, 7, 9, 10],
            ScaleType::Phrygian => [0, 1, 3, 5, 7, 8, 10],
            ScaleType::Lydian => [0, 2, 4, 6, 7, 9, 11],
            ScaleType::Mixolydian => [0, 2, 4, 5, 7, 9, 10],
        }
    }
}

impl std::str::FromStr for ScaleType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "major" | "ionian" => Ok(ScaleType::Major),
            "natural_minor" | "aeolian" => Ok(ScaleType::NaturalMinor),
            "harmonic_minor" => Ok(ScaleType::HarmonicMinor),
            "dorian" => Ok(ScaleType::Dorian),
            "phrygian" => Ok(ScaleType::Phrygian),
            "lydian" => Ok(ScaleType::Lydian),
            "mixolydian" => Ok(ScaleType::Mixolydian),
            _ => Err(ConfigError::UnknownScaleType(s.to_string())),
        }
    }
}

/// A concrete scale: a scale type anchored on a tonic pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    /// Pitch class of the tonic (0 = C, 2 = D, ...).
    pub tonic_pc: u8,
    pub scale_type: ScaleType,
}

impl Scale {
    pub fn new(tonic_pc: u8, scale_type: ScaleType) -> Self {
        Scale {
            tonic_pc: tonic_pc % 12,
            scale_type,
        }
    }

    /// C major, the default context for tests and the bundled config.
    pub fn c_major() -> Self {
        Scale::new(0, ScaleType::Major)
    }

    fn offset_index(&self, pitch: u8) -> Option<usize> {
        let pc = (pitch as i32 - self.tonic_pc as i32).rem_euclid(12) as u8;
        self.scale_type.intervals().iter().position(|&iv| iv == pc)
    }

    pub fn is_in_scale(&self, pitch: u8) -> bool {
        self.offset_index(pitch).is_some()
    }

    /// Scale degree (1 = tonic ... 7), or None for a chromatic pitch.
    pub fn degree(&self, pitch: u8) -> Option<u8> {
        self.offset_index(pitch).map(|i| i as u8 + 1)
    }

    /// Index of the pitch among all scale pitches, counted in scale steps.
    /// Consecutive scale pitches differ by exactly one.
    pub fn position_in_degrees(&self, pitch: u8) -> Option<i32> {
        let index = self.offset_index(pitch)? as i32;
        let octave = (pitch as i32 - self.tonic_pc as i32).div_euclid(12);
        Some(octave * 7 + index)
    }

    /// All scale pitches in `[low, high]`, ascending.
    pub fn pitches_in_range(&self, low: u8, high: u8) -> Vec<u8> {
        (low..=high).filter(|&p| self.is_in_scale(p)).collect()
    }
}

const PC_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

/// Parse a pitch class name such as `C`, `F#` or `Bb`.
pub fn parse_pitch_class(name: &str) -> Result<u8, ConfigError> {
    let invalid = || ConfigError::InvalidNoteName(name.to_string());
    let mut chars = name.chars();
    let base: i32 = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(invalid()),
    };
    let mut shift = 0i32;
    for c in chars {
        match c {
            '#' => shift += 1,
            'b' => shift -= 1,
            _ => return Err(invalid()),
        }
    }
    Ok((base + shift).rem_euclid(12) as u8)
}

/// Parse a note name with octave (`C4`, `F#3`, `Bb-1`) into a MIDI pitch.
pub fn parse_note_name(name: &str) -> Result<u8, ConfigError> {
    let invalid = || ConfigError::InvalidNoteName(name.to_string());
    let split = name
        .find(|c: char| c.is_ascii_digit() || c == '-')
        .ok_or_else(invalid)?;
    let (class, octave) = name.split_at(split);
    if class.is_empty() {
        return Err(invalid());
    }
    let octave: i32 = octave.parse().map_err(|_| invalid())?;
    // Accidentals may cross the octave boundary (B#3 = C4, Cb4 = B3).
    let with_accidental = parse_pitch_class(class)? as i32;
    let natural = parse_pitch_class(&class[..1])? as i32;
    let accidental = with_accidental - natural;
    let accidental = match accidental {
        a if a > 6 => a - 12,
        a if a < -6 => a + 12,
        a => a,
    };
    let midi = (octave + 1) * 12 + natural + accidental;
    u8::try_from(midi)
        .ok()
        .filter(|&p| p <= 127)
        .ok_or_else(invalid)
}

/// Format a MIDI pitch as a note name (e.g. "C4", "F#3").
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", PC_NAMES[(pitch % 12) as usize], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_membership() {
        let scale = Scale::c_major();
        for pitch in [60, 62, 64, 65, 67, 69, 71, 72] {
            assert!(scale.is_in_scale(pitch), "{} should be in C major", pitch);
        }
        assert!(!scale.is_in_scale(61)); // C#
        assert!(!scale.is_in_scale(66)); // F#
    }

    #[test]
    fn test_degrees() {
        let scale = Scale::new(9, ScaleType::HarmonicMinor); // A harmonic minor
        assert_eq!(scale.degree(57), Some(1)); // A3
        assert_eq!(scale.degree(64), Some(5)); // E4
        assert_eq!(scale.degree(68), Some(7)); // G#4
        assert_eq!(scale.degree(67), None); // G natural is not in it
    }

    #[test]
    fn test_position_in_degrees_is_stepwise() {
        let scale = Scale::c_major();
        let pitches = scale.pitches_in_range(48, 72);
        for pair in pitches.windows(2) {
            let a = scale.position_in_degrees(pair[0]).unwrap();
            let b = scale.position_in_degrees(pair[1]).unwrap();
            assert_eq!(b - a, 1, "{} -> {}", pair[0], pair[1]);
        }
        assert_eq!(
            scale.position_in_degrees(72).unwrap() - scale.position_in_degrees(60).unwrap(),
            7
        );
    }

    #[test]
    fn test_transposed_scale_crosses_octave() {
        let scale = Scale::new(7, ScaleType::Mixolydian); // G mixolydian
        assert_eq!(scale.degree(67), Some(1)); // G4
        assert_eq!(scale.degree(65), Some(7)); // F4, lowered 7th
        assert_eq!(
            scale.position_in_degrees(67).unwrap() - scale.position_in_degrees(65).unwrap(),
            1
        );
    }

    #[test]
    fn test_parse_note_names() {
        assert_eq!(parse_note_name("C4").unwrap(), 60);
        assert_eq!(parse_note_name("A4").unwrap(), 69);
        assert_eq!(parse_note_name("F#3").unwrap(), 54);
        assert_eq!(parse_note_name("Bb2").unwrap(), 46);
        assert_eq!(parse_note_name("B#3").unwrap(), 60);
        assert_eq!(parse_note_name("Cb4").unwrap(), 59);
        assert_eq!(parse_note_name("C-1").unwrap(), 0);
        assert!(parse_note_name("H4").is_err());
        assert!(parse_note_name("C").is_err());
        assert_eq!(parse_note_name("G9").unwrap(), 127);
        assert!(parse_note_name("G#9").is_err());
    }

    #[test]
    fn test_pitch_name_roundtrip() {
        for pitch in [21u8, 46, 54, 60, 69, 108] {
            assert_eq!(parse_note_name(&pitch_name(pitch)).unwrap(), pitch);
        }
    }

    #[test]
    fn test_scale_type_from_str() {
        assert_eq!("major".parse::<ScaleType>().unwrap(), ScaleType::Major);
        assert_eq!("Aeolian".parse::<ScaleType>().unwrap(), ScaleType::NaturalMinor);
        assert!("blues".parse::<ScaleType>().is_err());
    }
}
