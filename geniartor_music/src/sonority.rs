// Sonority extraction: the vertical view of a piece.
//
// A sonority is a maximal time span during which the set of sounding notes
// does not change. Boundaries are the union of all note onsets and offsets
// across voices; between two adjacent boundaries every voice holds exactly
// one note, because voices tile the whole timeline.
//
// Each sonority also gets a position label describing where it starts in
// the measure. Stability-based scoring uses the label to look up the range
// of stability wanted there (a downbeat wants more stability than an
// off-beat passing sonority).
//
// Extraction is a pure function of the piece; sonorities are recomputed for
// every candidate and never edited.

use crate::piece::{Piece, Tick};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric position of a sonority's start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Beginning,
    Ending,
    Downbeat,
    Middle,
    Other,
    Custom(String),
}

impl Position {
    pub fn label(&self) -> &str {
        match self {
            Position::Beginning => "beginning",
            Position::Ending => "ending",
            Position::Downbeat => "downbeat",
            Position::Middle => "middle",
            Position::Other => "other",
            Position::Custom(name) => name,
        }
    }
}

/// A note as seen from inside a sonority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundingNote {
    pub voice: usize,
    /// Index of the note within its voice.
    pub index: usize,
    pub pitch: u8,
}

/// Notes sounding throughout `[start, end)`, one per voice in voice order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sonority {
    pub start: Tick,
    pub end: Tick,
    pub notes: Vec<SoundingNote>,
    pub position: Position,
}

impl Sonority {
    pub fn duration(&self) -> Tick {
        self.end - self.start
    }

    pub fn pitches(&self) -> impl Iterator<Item = u8> + '_ {
        self.notes.iter().map(|n| n.pitch)
    }
}

/// Split the piece's timeline into sonorities.
///
/// `custom_positions` maps a start tick to a user label that overrides the
/// metric label there (but never `beginning` or `ending`).
pub fn extract_sonorities(
    piece: &Piece,
    custom_positions: &BTreeMap<Tick, String>,
) -> Vec<Sonority> {
    let mut boundaries: Vec<Tick> = piece
        .voices
        .iter()
        .flat_map(|v| v.notes.iter().flat_map(|n| [n.onset, n.offset()]))
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let bar = piece.meter.ticks_per_measure();
    let num_spans = boundaries.len().saturating_sub(1);
    let mut cursors = vec![0usize; piece.voices.len()];
    let mut sonorities = Vec::with_capacity(num_spans);

    for (i, span) in boundaries.windows(2).enumerate() {
        let (start, end) = (span[0], span[1]);
        let mut notes = Vec::with_capacity(piece.voices.len());
        for (vi, voice) in piece.voices.iter().enumerate() {
            // Notes are sorted by onset; skip the ones that ended already.
            while cursors[vi] < voice.notes.len() && voice.notes[cursors[vi]].offset() <= start {
                cursors[vi] += 1;
            }
            if let Some(note) = voice.notes.get(cursors[vi]) {
                if note.onset <= start && end <= note.offset() {
                    notes.push(SoundingNote {
                        voice: vi,
                        index: cursors[vi],
                        pitch: note.pitch,
                    });
                }
            }
        }

        let position = if i == 0 {
            Position::Beginning
        } else if i + 1 == num_spans {
            Position::Ending
        } else if let Some(label) = custom_positions.get(&start) {
            Position::Custom(label.clone())
        } else if start % bar == 0 {
            Position::Downbeat
        } else if bar % 2 == 0 && start % bar == bar / 2 {
            Position::Middle
        } else {
            Position::Other
        };

        sonorities.push(Sonority {
            start,
            end,
            notes,
            position,
        });
    }

    sonorities
}
