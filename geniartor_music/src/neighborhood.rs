// Neighborhood generation: elementary moves on a piece.
//
// Five kinds of elementary move:
// - Repitch: give one note another scale pitch inside its voice's tessitura.
// - Swap: exchange the pitches of two notes, possibly in different voices.
// - Split: cut one note into two notes of the same pitch.
// - Merge: join two adjacent notes of the same pitch.
// - Shift: move the boundary between two adjacent notes of a voice.
//
// Moves never touch the original piece; `Neighborhood::apply` returns a new
// piece, or None when the move would break a constraint (pitch outside the
// tessitura, a duration the voice does not allow, a measure no rhythmic
// pattern matches, a lost final whole note). Rhythm moves are never applied
// to voices with a fixed rhythm.
//
// `shake` draws a random neighbor of order k by applying k random moves in
// sequence. A rejected random move is redrawn (same kind) up to the retry
// budget; a slot whose budget runs out is dropped, so the perturbation may
// come out smaller than k. `all_moves` lists every order-1 move candidate for
// the local search.

use crate::config::VoiceRules;
use crate::error::ConfigError;
use crate::piece::{Note, Piece, Tick};
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

/// Kinds of elementary move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MoveKind {
    Repitch,
    Swap,
    Split,
    Merge,
    Shift,
}

impl MoveKind {
    pub const ALL: [MoveKind; 5] = [
        MoveKind::Repitch,
        MoveKind::Swap,
        MoveKind::Split,
        MoveKind::Merge,
        MoveKind::Shift,
    ];

    pub fn changes_rhythm(self) -> bool {
        matches!(self, MoveKind::Split | MoveKind::Merge | MoveKind::Shift)
    }
}

/// An elementary move. Notes are addressed by (voice, index within voice).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Repitch { voice: usize, index: usize, pitch: u8 },
    Swap { first: (usize, usize), second: (usize, usize) },
    /// The note keeps `head` ticks; a new note takes the rest.
    Split { voice: usize, index: usize, head: Tick },
    /// Join note `index` with the one after it.
    Merge { voice: usize, index: usize },
    /// Note `index` now lasts `head` ticks; note `index + 1` absorbs the
    /// difference.
    Shift { voice: usize, index: usize, head: Tick },
}

impl Move {
    pub fn kind(&self) -> MoveKind {
        match self {
            Move::Repitch { .. } => MoveKind::Repitch,
            Move::Swap { .. } => MoveKind::Swap,
            Move::Split { .. } => MoveKind::Split,
            Move::Merge { .. } => MoveKind::Merge,
            Move::Shift { .. } => MoveKind::Shift,
        }
    }
}

/// Relative probability of drawing each move kind. A zero weight disables
/// the kind entirely, including in local search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoveWeights {
    pub repitch: f64,
    pub swap: f64,
    pub split: f64,
    pub merge: f64,
    pub shift: f64,
}

impl Default for MoveWeights {
    fn default() -> Self {
        MoveWeights {
            repitch: 0.5,
            swap: 0.1,
            split: 0.15,
            merge: 0.1,
            shift: 0.15,
        }
    }
}

impl MoveWeights {
    pub fn get(&self, kind: MoveKind) -> f64 {
        match kind {
            MoveKind::Repitch => self.repitch,
            MoveKind::Swap => self.swap,
            MoveKind::Split => self.split,
            MoveKind::Merge => self.merge,
            MoveKind::Shift => self.shift,
        }
    }
}

/// Result of a shake.
#[derive(Debug, Clone)]
pub struct Shaken {
    pub piece: Piece,
    /// How many of the requested moves were applied.
    pub applied: usize,
}

/// Move generator for pieces built under one set of voice rules.
#[derive(Debug, Clone)]
pub struct Neighborhood {
    voices: Vec<VoiceRules>,
    kinds: Vec<MoveKind>,
    kind_dist: WeightedIndex<f64>,
    retry_budget: usize,
}

impl Neighborhood {
    pub fn new(
        voices: Vec<VoiceRules>,
        weights: MoveWeights,
        retry_budget: usize,
    ) -> Result<Self, ConfigError> {
        for kind in MoveKind::ALL {
            let w = weights.get(kind);
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::InvalidSearch(format!(
                    "move weight of {:?} must be finite and non-negative, got {}",
                    kind, w
                )));
            }
        }
        let kinds: Vec<MoveKind> = MoveKind::ALL
            .into_iter()
            .filter(|&k| weights.get(k) > 0.0)
            .collect();
        let kind_dist = WeightedIndex::new(kinds.iter().map(|&k| weights.get(k)))
            .map_err(|_| ConfigError::InvalidSearch("all move weights are zero".to_string()))?;
        Ok(Neighborhood {
            voices,
            kinds,
            kind_dist,
            retry_budget,
        })
    }

    /// Apply one move, returning the new piece if every constraint still holds.
    pub fn apply(&self, piece: &Piece, mv: &Move) -> Option<Piece> {
        match *mv {
            Move::Repitch {
                voice,
                index,
                pitch,
            } => {
                let rules = self.voices.get(voice)?;
                let current = piece.voices.get(voice)?.notes.get(index)?.pitch;
                if pitch == current || rules.pitches.binary_search(&pitch).is_err() {
                    return None;
                }
                let mut next = piece.clone();
                next.voices[voice].notes[index].pitch = pitch;
                Some(next)
            }
            Move::Swap { first, second } => {
                if first == second {
                    return None;
                }
                let a = piece.voices.get(first.0)?.notes.get(first.1)?.pitch;
                let b = piece.voices.get(second.0)?.notes.get(second.1)?.pitch;
                if a == b
                    || !self.voices.get(first.0)?.tessitura.contains(b)
                    || !self.voices.get(second.0)?.tessitura.contains(a)
                {
                    return None;
                }
                let mut next = piece.clone();
                next.voices[first.0].notes[first.1].pitch = b;
                next.voices[second.0].notes[second.1].pitch = a;
                Some(next)
            }
            Move::Split { voice, index, head } => {
                let note = *piece.voices.get(voice)?.notes.get(index)?;
                if head == 0 || head >= note.duration {
                    return None;
                }
                self.reshape(piece, voice, |notes| {
                    notes[index].duration = head;
                    let mut tail = note;
                    tail.duration = note.duration - head;
                    notes.insert(index + 1, tail);
                })
            }
            Move::Merge { voice, index } => {
                let notes = &piece.voices.get(voice)?.notes;
                let (a, b) = (notes.get(index)?, notes.get(index + 1)?);
                if a.pitch != b.pitch {
                    return None;
                }
                let merged = a.duration + b.duration;
                self.reshape(piece, voice, |notes| {
                    notes[index].duration = merged;
                    notes.remove(index + 1);
                })
            }
            Move::Shift { voice, index, head } => {
                let notes = &piece.voices.get(voice)?.notes;
                let (a, b) = (notes.get(index)?, notes.get(index + 1)?);
                let span = a.duration + b.duration;
                if head == 0 || head >= span || head == a.duration {
                    return None;
                }
                self.reshape(piece, voice, |notes| {
                    notes[index].duration = head;
                    notes[index + 1].duration = span - head;
                })
            }
        }
    }

    /// Edit one voice's notes, relayout, and keep the result only if the
    /// voice's rhythm rules accept it.
    fn reshape(
        &self,
        piece: &Piece,
        voice: usize,
        edit: impl FnOnce(&mut Vec<Note>),
    ) -> Option<Piece> {
        let rules = self.voices.get(voice)?;
        if !rules.rhythm_is_free() {
            return None;
        }
        let mut next = piece.clone();
        let line = &mut next.voices[voice];
        edit(&mut line.notes);
        line.relayout();
        if rules.rhythm.accepts(&line.durations(), piece.length()) {
            Some(next)
        } else {
            None
        }
    }

    /// Draw a random move of the given kind. The move may still be invalid.
    pub fn random_move(&self, piece: &Piece, kind: MoveKind, rng: &mut impl Rng) -> Option<Move> {
        if piece.voices.is_empty() {
            return None;
        }
        let voice = rng.random_range(0..piece.voices.len());
        let notes = &piece.voices[voice].notes;
        if notes.is_empty() {
            return None;
        }
        let index = rng.random_range(0..notes.len());
        let rules = self.voices.get(voice)?;
        let allowed = &rules.rhythm.allowed_durations;

        match kind {
            MoveKind::Repitch => {
                let pitch = rules.pitches[rng.random_range(0..rules.pitches.len())];
                Some(Move::Repitch {
                    voice,
                    index,
                    pitch,
                })
            }
            MoveKind::Swap => {
                let other = rng.random_range(0..piece.voices.len());
                let other_index = rng.random_range(0..piece.voices[other].notes.len().max(1));
                Some(Move::Swap {
                    first: (voice, index),
                    second: (other, other_index),
                })
            }
            MoveKind::Split => {
                let duration = notes[index].duration;
                let heads: Vec<Tick> = allowed.iter().copied().filter(|&d| d < duration).collect();
                let head = *heads.get(rng.random_range(0..heads.len().max(1)))?;
                Some(Move::Split { voice, index, head })
            }
            MoveKind::Merge => {
                if notes.len() < 2 {
                    return None;
                }
                let index = rng.random_range(0..notes.len() - 1);
                Some(Move::Merge { voice, index })
            }
            MoveKind::Shift => {
                if notes.len() < 2 {
                    return None;
                }
                let index = rng.random_range(0..notes.len() - 1);
                let span = notes[index].duration + notes[index + 1].duration;
                let heads: Vec<Tick> = allowed.iter().copied().filter(|&d| d < span).collect();
                let head = *heads.get(rng.random_range(0..heads.len().max(1)))?;
                Some(Move::Shift { voice, index, head })
            }
        }
    }

    /// Draw and apply one random move, retrying rejected draws of the same
    /// kind. Returns None once the retry budget is spent.
    pub fn random_neighbor(&self, piece: &Piece, rng: &mut impl Rng) -> Option<Piece> {
        let kind = self.kinds[self.kind_dist.sample(rng)];
        for _ in 0..=self.retry_budget {
            if let Some(next) = self
                .random_move(piece, kind, rng)
                .and_then(|mv| self.apply(piece, &mv))
            {
                return Some(next);
            }
        }
        None
    }

    /// Random neighbor of order `k`: `k` random moves applied in sequence.
    pub fn shake(&self, piece: &Piece, k: usize, rng: &mut impl Rng) -> Shaken {
        let mut current = piece.clone();
        let mut applied = 0;
        for _ in 0..k {
            if let Some(next) = self.random_neighbor(&current, rng) {
                current = next;
                applied += 1;
            }
        }
        if applied < k {
            log::debug!("shake of order {} applied only {} moves", k, applied);
        }
        Shaken {
            piece: current,
            applied,
        }
    }

    /// Every order-1 move candidate of the enabled kinds. Candidates still
    /// go through `apply`, which rejects the invalid ones.
    pub fn all_moves(&self, piece: &Piece) -> Vec<Move> {
        let mut moves = Vec::new();
        for &kind in &self.kinds {
            for (voice, (line, rules)) in piece.voices.iter().zip(&self.voices).enumerate() {
                if kind.changes_rhythm() && !rules.rhythm_is_free() {
                    continue;
                }
                let allowed = &rules.rhythm.allowed_durations;
                for (index, note) in line.notes.iter().enumerate() {
                    match kind {
                        MoveKind::Repitch => moves.extend(
                            rules
                                .pitches
                                .iter()
                                .filter(|&&p| p != note.pitch)
                                .map(|&pitch| Move::Repitch {
                                    voice,
                                    index,
                                    pitch,
                                }),
                        ),
                        MoveKind::Swap => {
                            // Each unordered pair once: partners come later
                            // in (voice, index) order.
                            for (other, other_line) in piece.voices.iter().enumerate().skip(voice) {
                                let start = if other == voice { index + 1 } else { 0 };
                                for (other_index, partner) in other_line.notes.iter().enumerate().skip(start) {
                                    if partner.pitch != note.pitch {
                                        moves.push(Move::Swap {
                                            first: (voice, index),
                                            second: (other, other_index),
                                        });
                                    }
                                }
                            }
                        }
                        MoveKind::Split => moves.extend(
                            allowed
                                .iter()
                                .filter(|&&d| d < note.duration)
                                .map(|&head| Move::Split { voice, index, head }),
                        ),
                        MoveKind::Merge => {
                            if line.notes.get(index + 1).is_some_and(|n| n.pitch == note.pitch) {
                                moves.push(Move::Merge { voice, index });
                            }
                        }
                        MoveKind::Shift => {
                            if let Some(next) = line.notes.get(index + 1) {
                                let span = note.duration + next.duration;
                                moves.extend(
                                    allowed
                                        .iter()
                                        .filter(|&&d| d < span && d != note.duration)
                                        .map(|&head| Move::Shift { voice, index, head }),
                                );
                            }
                        }
                    }
                }
            }
        }
        moves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PieceConstraints, VoiceConstraints};
    use crate::draft::build_draft;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn constraints() -> crate::config::Constraints {
        PieceConstraints {
            n_measures: 3,
            voices: vec![VoiceConstraints::new("C3", "C4"), VoiceConstraints::new("E4", "E5")],
            ..PieceConstraints::default()
        }
        .resolve()
        .unwrap()
    }

    fn neighborhood(constraints: &crate::config::Constraints) -> Neighborhood {
        Neighborhood::new(constraints.voices.clone(), MoveWeights::default(), 20).unwrap()
    }

    fn assert_legal(piece: &Piece, constraints: &crate::config::Constraints) {
        piece.validate().expect("timeline invariants");
        for (voice, rules) in piece.voices.iter().zip(&constraints.voices) {
            assert!(rules.rhythm.accepts(&voice.durations(), piece.length()), "rhythm {:?}", voice.durations());
            for note in &voice.notes {
                assert!(rules.tessitura.contains(note.pitch), "pitch {} outside tessitura", note.pitch);
            }
        }
    }

    #[test]
    fn test_every_move_preserves_duration_and_tessitura() {
        let constraints = constraints();
        let hood = neighborhood(&constraints);
        let mut rng = StdRng::seed_from_u64(5);
        let piece = build_draft(&constraints, &mut rng).unwrap();
        let moves = hood.all_moves(&piece);
        assert!(!moves.is_empty());
        let mut applied_kinds = std::collections::BTreeSet::new();
        for mv in &moves {
            if let Some(next) = hood.apply(&piece, mv) {
                assert_legal(&next, &constraints);
                applied_kinds.insert(mv.kind());
            }
        }
        assert!(applied_kinds.contains(&MoveKind::Repitch));
        assert!(applied_kinds.contains(&MoveKind::Swap));
    }

    #[test]
    fn test_shake_stays_legal() {
        let constraints = constraints();
        let hood = neighborhood(&constraints);
        let mut rng = StdRng::seed_from_u64(9);
        let mut piece = build_draft(&constraints, &mut rng).unwrap();
        for k in 1..=4 {
            for _ in 0..25 {
                let shaken = hood.shake(&piece, k, &mut rng);
                assert!(shaken.applied <= k);
                assert_legal(&shaken.piece, &constraints);
                piece = shaken.piece;
            }
        }
    }

    #[test]
    fn test_apply_does_not_touch_the_original() {
        let constraints = constraints();
        let hood = neighborhood(&constraints);
        let mut rng = StdRng::seed_from_u64(1);
        let piece = build_draft(&constraints, &mut rng).unwrap();
        let before = piece.clone();
        for mv in hood.all_moves(&piece).iter().take(50) {
            let _ = hood.apply(&piece, mv);
        }
        assert_eq!(piece, before);
    }

    #[test]
    fn test_invalid_moves_rejected() {
        let constraints = constraints();
        let hood = neighborhood(&constraints);
        let mut rng = StdRng::seed_from_u64(2);
        let piece = build_draft(&constraints, &mut rng).unwrap();
        let current = piece.voices[0].notes[0].pitch;
        // Same pitch, chromatic pitch, pitch outside the tessitura.
        for pitch in [current, 49, 72] {
            let mv = Move::Repitch {
                voice: 0,
                index: 0,
                pitch,
            };
            assert!(hood.apply(&piece, &mv).is_none(), "pitch {}", pitch);
        }
        let out_of_range = Move::Merge { voice: 5, index: 0 };
        assert!(hood.apply(&piece, &out_of_range).is_none());
        // The final whole note cannot be split.
        let last = piece.voices[1].notes.len() - 1;
        let split = Move::Split {
            voice: 1,
            index: last,
            head: 4,
        };
        assert!(hood.apply(&piece, &split).is_none());
    }

    #[test]
    fn test_swap_checks_receiving_tessitura() {
        let constraints = constraints();
        let hood = neighborhood(&constraints);
        let mut rng = StdRng::seed_from_u64(4);
        let piece = build_draft(&constraints, &mut rng).unwrap();
        // The voices' ranges do not overlap, so no cross-voice swap is legal.
        let swap = Move::Swap {
            first: (0, 0),
            second: (1, 0),
        };
        assert!(hood.apply(&piece, &swap).is_none());
    }

    #[test]
    fn test_fixed_rhythm_is_frozen() {
        let mut voice = VoiceConstraints::new("C4", "C5");
        voice.durations = Some(vec![4, 4, 8, 8]);
        let constraints = PieceConstraints {
            n_measures: 3,
            voices: vec![voice],
            ..PieceConstraints::default()
        }
        .resolve()
        .unwrap();
        let hood = neighborhood(&constraints);
        let mut rng = StdRng::seed_from_u64(8);
        let piece = build_draft(&constraints, &mut rng).unwrap();
        assert!(hood.all_moves(&piece).iter().all(|m| m.kind() == MoveKind::Repitch || m.kind() == MoveKind::Swap));
        for _ in 0..20 {
            let shaken = hood.shake(&piece, 3, &mut rng);
            assert_eq!(shaken.piece.voices[0].durations(), vec![4, 4, 8, 8]);
        }
    }

    #[test]
    fn test_all_zero_weights_rejected() {
        let weights = MoveWeights {
            repitch: 0.0,
            swap: 0.0,
            split: 0.0,
            merge: 0.0,
            shift: 0.0,
        };
        assert!(Neighborhood::new(constraints().voices, weights, 5).is_err());
    }

    #[test]
    fn test_split_then_merge_restores_rhythm() {
        let mut voice = VoiceConstraints::new("C4", "C5");
        voice.allowed_durations = Some(vec![2, 4, 8]);
        let constraints = PieceConstraints {
            n_measures: 2,
            voices: vec![voice],
            rhythmic_patterns: vec![],
            end_with_whole_note: false,
            ..PieceConstraints::default()
        }
        .resolve()
        .unwrap();
        let hood = neighborhood(&constraints);
        let piece = Piece::new(
            constraints.scale,
            constraints.meter,
            2,
            vec![crate::piece::Voice::from_pitches_and_durations(
                0,
                constraints.voices[0].tessitura,
                &[60, 64],
                &[8, 8],
            )],
        )
        .unwrap();
        let split = hood
            .apply(&piece, &Move::Split { voice: 0, index: 0, head: 4 })
            .unwrap();
        assert_eq!(split.voices[0].durations(), vec![4, 4, 8]);
        assert_eq!(split.voices[0].pitches(), vec![60, 60, 64]);
        let merged = hood.apply(&split, &Move::Merge { voice: 0, index: 0 }).unwrap();
        assert_eq!(merged, piece);
    }
}
