// The piece model: the central representation for composition search.
//
// A piece is a set of voices sharing one timeline of `n_measures` measures.
// Each voice is a list of notes that tiles the timeline exactly: the first
// note starts at tick 0, each note starts where the previous one ends, and
// the last one ends at the piece length. Time is counted in integer ticks of
// one eighth note, so every duration and boundary is exact.
//
// Voices are ordered from the lowest (index 0) to the highest. Each voice
// carries its tessitura so that scoring and moves can check ranges without
// going back to the configuration.
//
// During the search a piece is never edited in place: moves (neighborhood.rs)
// clone it and return a new one. `Piece::validate` is the invariant check the
// evaluator runs before scoring anything.

use crate::error::{ConfigError, GenerationError};
use crate::scale::{Scale, pitch_name};
use serde::{Deserialize, Serialize};

/// Time in eighth-note ticks.
pub type Tick = u32;

/// Ticks in a whole note.
pub const TICKS_PER_WHOLE: Tick = 8;

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    pub beats_per_measure: u32,
    /// Note value of one beat: 1, 2, 4 or 8.
    pub beat_unit: u32,
}

impl Meter {
    pub fn new(beats_per_measure: u32, beat_unit: u32) -> Result<Self, ConfigError> {
        let meter = Meter {
            beats_per_measure,
            beat_unit,
        };
        meter.check()?;
        Ok(meter)
    }

    pub fn common_time() -> Self {
        Meter {
            beats_per_measure: 4,
            beat_unit: 4,
        }
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        let supported = matches!(self.beat_unit, 1 | 2 | 4 | 8) && self.beats_per_measure > 0;
        if supported {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedMeter {
                beats: self.beats_per_measure,
                unit: self.beat_unit,
            })
        }
    }

    pub fn ticks_per_measure(&self) -> Tick {
        self.beats_per_measure * TICKS_PER_WHOLE / self.beat_unit
    }
}

/// A single note of one voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    /// MIDI pitch number.
    pub pitch: u8,
    pub onset: Tick,
    pub duration: Tick,
    /// Index of the owning voice.
    pub voice: usize,
}

impl Note {
    /// Exclusive end of the note.
    pub fn offset(&self) -> Tick {
        self.onset + self.duration
    }
}

/// Allowed pitch range of a voice, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tessitura {
    pub low: u8,
    pub high: u8,
}

impl Tessitura {
    pub fn contains(&self, pitch: u8) -> bool {
        self.low <= pitch && pitch <= self.high
    }
}

/// One monophonic line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: usize,
    pub tessitura: Tessitura,
    pub notes: Vec<Note>,
}

impl Voice {
    /// Build a voice from parallel pitch and duration lists, laying the notes
    /// end to end from tick 0.
    pub fn from_pitches_and_durations(
        id: usize,
        tessitura: Tessitura,
        pitches: &[u8],
        durations: &[Tick],
    ) -> Self {
        let mut onset = 0;
        let notes = pitches
            .iter()
            .zip(durations)
            .map(|(&pitch, &duration)| {
                let note = Note {
                    pitch,
                    onset,
                    duration,
                    voice: id,
                };
                onset += duration;
                note
            })
            .collect();
        Voice {
            id,
            tessitura,
            notes,
        }
    }

    pub fn durations(&self) -> Vec<Tick> {
        self.notes.iter().map(|n| n.duration).collect()
    }

    pub fn pitches(&self) -> Vec<u8> {
        self.notes.iter().map(|n| n.pitch).collect()
    }

    pub fn total_duration(&self) -> Tick {
        self.notes.iter().map(|n| n.duration).sum()
    }

    /// Recompute onsets from durations after a rhythm change.
    pub(crate) fn relayout(&mut self) {
        let mut onset = 0;
        for note in &mut self.notes {
            note.onset = onset;
            note.voice = self.id;
            onset += note.duration;
        }
    }
}

/// A complete candidate composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub scale: Scale,
    pub meter: Meter,
    pub n_measures: u32,
    /// Voices from lowest to highest.
    pub voices: Vec<Voice>,
}

impl Piece {
    /// Assemble a piece and check its timeline invariants.
    pub fn new(
        scale: Scale,
        meter: Meter,
        n_measures: u32,
        voices: Vec<Voice>,
    ) -> Result<Self, GenerationError> {
        let piece = Piece {
            scale,
            meter,
            n_measures,
            voices,
        };
        piece.validate()?;
        Ok(piece)
    }

    /// Total length in ticks.
    pub fn length(&self) -> Tick {
        self.n_measures * self.meter.ticks_per_measure()
    }

    pub fn num_notes(&self) -> usize {
        self.voices.iter().map(|v| v.notes.len()).sum()
    }

    pub fn note(&self, voice: usize, index: usize) -> &Note {
        &self.voices[voice].notes[index]
    }

    /// Verify that every voice tiles `[0, length)` with well-formed notes.
    pub fn validate(&self) -> Result<(), GenerationError> {
        let fail = |msg: String| Err(GenerationError::InternalConsistency(msg));
        let length = self.length();
        for (vi, voice) in self.voices.iter().enumerate() {
            if voice.id != vi {
                return fail(format!("voice at position {} has id {}", vi, voice.id));
            }
            if voice.notes.is_empty() {
                return fail(format!("voice {} has no notes", vi));
            }
            let mut expected_onset = 0;
            for (ni, note) in voice.notes.iter().enumerate() {
                if note.voice != vi {
                    return fail(format!("voice {} note {} claims voice {}", vi, ni, note.voice));
                }
                if note.duration == 0 {
                    return fail(format!("voice {} note {} has zero duration", vi, ni));
                }
                if note.pitch > 127 {
                    return fail(format!("voice {} note {} has pitch {}", vi, ni, note.pitch));
                }
                if note.onset != expected_onset {
                    return fail(format!(
                        "voice {} note {} starts at {} but the previous note ends at {}",
                        vi, ni, note.onset, expected_onset
                    ));
                }
                expected_onset = note.offset();
            }
            if expected_onset != length {
                return fail(format!(
                    "voice {} lasts {} ticks, piece lasts {}",
                    vi, expected_onset, length
                ));
            }
        }
        Ok(())
    }

    /// Compact text rendering, highest voice first. Each note prints its
    /// name followed by one dash per extra tick; bars are separated by `|`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let bar = self.meter.ticks_per_measure();
        for voice in self.voices.iter().rev() {
            out.push_str(&format!("{:>8}: ", format!("Voice {}", voice.id)));
            for note in &voice.notes {
                for tick in note.onset..note.offset() {
                    if tick > 0 && tick % bar == 0 {
                        out.push('|');
                    }
                    if tick == note.onset {
                        out.push_str(&pitch_name(note.pitch));
                    } else {
                        out.push('-');
                    }
                }
            }
            out.push('\n');
        }
        out
    }
}
