// Draft generation: the random starting piece for the search.
//
// Each voice gets its fixed rhythm if one is configured, otherwise a random
// rhythm from its rhythm rules (weighted by the configured duration weights).
// Pitches are drawn uniformly from the scale pitches inside the voice's
// tessitura. The draft satisfies every hard constraint; making it sound good
// is the search's job (vns.rs).

use crate::config::Constraints;
use crate::error::{ConfigError, GenerationError};
use crate::piece::{Piece, Voice};
use rand::Rng;

/// Build a random piece satisfying all constraints.
///
/// Fails with `ConfigError::InvalidRhythm` when no line of the required
/// length can be drawn for a voice, e.g. when every duration that fits has
/// weight zero.
pub fn build_draft(constraints: &Constraints, rng: &mut impl Rng) -> Result<Piece, GenerationError> {
    let length = constraints.length();
    let mut voices = Vec::with_capacity(constraints.voices.len());

    for (vi, rules) in constraints.voices.iter().enumerate() {
        let durations = match &rules.fixed_durations {
            Some(fixed) => fixed.clone(),
            None => rules
                .rhythm
                .generate_line(length, &constraints.duration_weights, rng)
                .ok_or_else(|| ConfigError::InvalidRhythm {
                    voice: vi,
                    reason: format!("no rhythm of {} ticks satisfies the rhythmic patterns", length),
                })?,
        };
        let pitches: Vec<u8> = durations
            .iter()
            .map(|_| rules.pitches[rng.random_range(0..rules.pitches.len())])
            .collect();
        voices.push(Voice::from_pitches_and_durations(
            vi,
            rules.tessitura,
            &pitches,
            &durations,
        ));
    }

    let piece = Piece::new(constraints.scale, constraints.meter, constraints.n_measures, voices)?;
    log::debug!("draft with {} notes", piece.num_notes());
    Ok(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PieceConstraints, VoiceConstraints};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_draft_satisfies_constraints() {
        let constraints = PieceConstraints::default().resolve().unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let piece = build_draft(&constraints, &mut rng).unwrap();
            assert_eq!(piece.voices.len(), constraints.voices.len());
            for (voice, rules) in piece.voices.iter().zip(&constraints.voices) {
                assert!(rules.rhythm.accepts(&voice.durations(), piece.length()));
                for note in &voice.notes {
                    assert!(rules.tessitura.contains(note.pitch));
                    assert!(constraints.scale.is_in_scale(note.pitch));
                }
            }
        }
    }

    #[test]
    fn test_draft_is_seed_deterministic() {
        let constraints = PieceConstraints::default().resolve().unwrap();
        let a = build_draft(&constraints, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = build_draft(&constraints, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_rhythm_is_used() {
        let mut voice = VoiceConstraints::new("A3", "A4");
        voice.durations = Some(vec![2, 2, 4, 8]);
        let constraints = PieceConstraints {
            n_measures: 2,
            voices: vec![voice],
            ..PieceConstraints::default()
        }
        .resolve()
        .unwrap();
        let piece = build_draft(&constraints, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(piece.voices[0].durations(), vec![2, 2, 4, 8]);
    }
}
