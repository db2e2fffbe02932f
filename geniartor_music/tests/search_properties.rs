// End-to-end properties of the search.
//
// Builds composers from in-code configurations (and the bundled default
// config file), runs complete searches, and checks the guarantees callers
// rely on: strict improvement on a fixable piece, reproducibility per seed,
// untouched output with a zero pass budget, monotone incumbent fitness,
// configuration errors before any search, and pluggable scoring functions.

use geniartor_music::config::{GeneratorConfig, PieceConstraints, VoiceConstraints};
use geniartor_music::error::ConfigError;
use geniartor_music::evaluation::Evaluator;
use geniartor_music::piece::{Piece, Voice};
use geniartor_music::scoring::{self, ScoringFunction, ScoringParams, ScoringRegistry};
use geniartor_music::sonority::{Sonority, extract_sonorities};
use geniartor_music::vns::{Composer, SearchConfig};
use std::collections::BTreeMap;
use std::path::Path;

fn weights(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries.iter().map(|&(n, w)| (n.to_string(), w)).collect()
}

/// Two voices over two measures with a small search budget.
fn small_config() -> GeneratorConfig {
    let mut config = GeneratorConfig::default();
    config.piece = PieceConstraints {
        n_measures: 2,
        voices: vec![VoiceConstraints::new("C3", "C4"), VoiceConstraints::new("C4", "C5")],
        ..PieceConstraints::default()
    };
    config.search = SearchConfig {
        n_passes: 2,
        k_max: 2,
        local_search_budget: 10,
        local_search_fraction: 0.5,
        n_runs: 3,
        seed: 17,
        ..SearchConfig::default()
    };
    config
}

/// One voice, four quarter notes with a fixed rhythm in one 4/4 measure.
fn single_voice_config() -> GeneratorConfig {
    let mut voice = VoiceConstraints::new("C4", "C5");
    voice.durations = Some(vec![2, 2, 2, 2]);
    let mut config = GeneratorConfig::default();
    config.piece = PieceConstraints {
        n_measures: 1,
        voices: vec![voice],
        rhythmic_patterns: vec![],
        end_with_whole_note: false,
        ..PieceConstraints::default()
    };
    config.evaluation.weights = weights(&[(scoring::TONAL_STABILITY, 1.0)]);
    config.search = SearchConfig {
        n_passes: 1,
        k_max: 1,
        local_search_budget: 5,
        local_search_fraction: 1.0,
        n_runs: 1,
        ..SearchConfig::default()
    };
    config
}

fn single_voice_piece(composer: &Composer, pitches: &[u8]) -> Piece {
    let constraints = composer.constraints();
    let voice = Voice::from_pitches_and_durations(0, constraints.voices[0].tessitura, pitches, &[2, 2, 2, 2]);
    Piece::new(constraints.scale, constraints.meter, constraints.n_measures, vec![voice]).unwrap()
}

#[test]
fn test_unstable_sonority_is_improved() {
    let composer = Composer::new(&single_voice_config()).unwrap();
    // B4 (degree 7, stability 0) sits on the middle of the measure.
    let start = single_voice_piece(&composer, &[60, 64, 71, 60]);
    let initial = composer.evaluator().evaluate(&start).unwrap();
    assert!(initial < 0.0, "start should be penalized, got {}", initial);

    let result = composer.run_from(start, 0).unwrap();
    assert!(
        result.fitness > initial,
        "expected strict improvement over {}, got {}",
        initial,
        result.fitness
    );
    assert_eq!(result.initial_fitness, initial);
}

#[test]
fn test_zero_passes_returns_initial_piece() {
    let mut config = single_voice_config();
    config.search.n_passes = 0;
    let composer = Composer::new(&config).unwrap();
    let start = single_voice_piece(&composer, &[60, 64, 71, 60]);
    let result = composer.run_from(start.clone(), 0).unwrap();
    assert_eq!(result.piece, start);
    assert_eq!(result.trace.len(), 1);
}

#[test]
fn test_single_weight_fitness_equals_function_score() {
    let mut config = small_config();
    config.evaluation.weights = weights(&[(scoring::CONJUNCT_MOTION, 1.0)]);
    let composer = Composer::new(&config).unwrap();
    let result = composer.search().unwrap();

    let registry = ScoringRegistry::with_params(&ScoringParams::default());
    let sonorities = extract_sonorities(&result.piece, &BTreeMap::new());
    let score = registry
        .get(scoring::CONJUNCT_MOTION)
        .unwrap()
        .evaluate(&result.piece, &sonorities);
    assert_eq!(result.fitness, score);
}

#[test]
fn test_same_seed_same_piece() {
    let composer = Composer::new(&small_config()).unwrap();
    let first = composer.search().unwrap();
    let second = composer.search().unwrap();
    assert_eq!(first.piece, second.piece);
    assert_eq!(first.fitness.to_bits(), second.fitness.to_bits());
    assert_eq!(first.seed, second.seed);

    let again = Composer::new(&small_config()).unwrap().run(first.seed).unwrap();
    assert_eq!(again.piece, first.piece);
}

#[test]
fn test_incumbent_never_gets_worse() {
    let composer = Composer::new(&small_config()).unwrap();
    for seed in 0..3 {
        let result = composer.run(seed).unwrap();
        for pair in result.trace.windows(2) {
            assert!(pair[1] >= pair[0], "seed {}: trace {:?}", seed, result.trace);
        }
        assert!(result.fitness >= result.initial_fitness);
        result.piece.validate().unwrap();
    }
}

#[test]
fn test_result_respects_constraints() {
    let composer = Composer::new(&small_config()).unwrap();
    let result = composer.search().unwrap();
    let constraints = composer.constraints();
    assert_eq!(result.piece.length(), constraints.length());
    for (voice, rules) in result.piece.voices.iter().zip(&constraints.voices) {
        assert!(rules.rhythm.accepts(&voice.durations(), constraints.length()));
        assert!(voice.notes.iter().all(|n| rules.tessitura.contains(n.pitch)));
        assert!(voice.notes.iter().all(|n| constraints.scale.is_in_scale(n.pitch)));
    }
}

#[test]
fn test_configuration_errors_stop_before_search() {
    let mut config = small_config();
    config.evaluation.weights = weights(&[("melodic_beauty", 1.0)]);
    assert!(matches!(
        Composer::new(&config),
        Err(ConfigError::UnknownScoringFunction(name)) if name == "melodic_beauty"
    ));

    let mut config = small_config();
    config.evaluation.weights = weights(&[(scoring::CLIMAX_SHAPE, -0.5)]);
    assert!(matches!(Composer::new(&config), Err(ConfigError::InvalidWeight { .. })));

    let mut config = small_config();
    config.piece.voices[1] = VoiceConstraints::new("C5", "C4");
    assert!(matches!(
        Composer::new(&config),
        Err(ConfigError::ContradictoryTessitura { voice: 1, .. })
    ));
}

/// Rewards high notes: mean distance of every note below the top of the
/// voice's range, scaled to [-1, 0].
struct PreferHighNotes;

impl ScoringFunction for PreferHighNotes {
    fn name(&self) -> &'static str {
        "prefer_high_notes"
    }

    fn evaluate(&self, piece: &Piece, _sonorities: &[Sonority]) -> f64 {
        let mut total = 0.0;
        let mut count = 0;
        for voice in &piece.voices {
            let span = (voice.tessitura.high - voice.tessitura.low).max(1) as f64;
            for note in &voice.notes {
                total += (voice.tessitura.high.saturating_sub(note.pitch)) as f64 / span;
                count += 1;
            }
        }
        if count == 0 { 0.0 } else { -total / count as f64 }
    }
}

#[test]
fn test_custom_scoring_function_drives_search() {
    let config = small_config();
    let constraints = config.piece.resolve().unwrap();
    let mut registry = ScoringRegistry::with_params(&ScoringParams::default());
    registry.register(Box::new(PreferHighNotes)).unwrap();
    let evaluator = Evaluator::new(
        registry,
        &weights(&[("prefer_high_notes", 1.0)]),
        constraints.custom_positions.clone(),
    )
    .unwrap();
    let composer = Composer::from_parts(constraints, evaluator, config.search.clone()).unwrap();

    // Every note at the bottom of its range: the worst possible start.
    let constraints = composer.constraints();
    let voices = constraints
        .voices
        .iter()
        .enumerate()
        .map(|(vi, rules)| {
            let low = rules.pitches[0];
            Voice::from_pitches_and_durations(vi, rules.tessitura, &[low, low, low], &[4, 4, 8])
        })
        .collect();
    let start = Piece::new(constraints.scale, constraints.meter, constraints.n_measures, voices).unwrap();

    let result = composer.run_from(start, 0).unwrap();
    assert_eq!(result.initial_fitness, -1.0);
    assert!(
        result.fitness > result.initial_fitness,
        "search should move notes upward, got {}",
        result.fitness
    );
    let breakdown = composer.evaluator().breakdown(&result.piece).unwrap();
    assert_eq!(breakdown.keys().copied().collect::<Vec<_>>(), vec!["prefer_high_notes"]);
}

#[test]
fn test_bundled_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/default_config.json");
    let config = GeneratorConfig::load(&path).unwrap();
    assert_eq!(config.search, SearchConfig::default());
    assert_eq!(config.rendering, geniartor_music::midi::RenderingConfig::default());
    assert_eq!(
        config.piece.resolve().unwrap(),
        PieceConstraints::default().resolve().unwrap()
    );
    assert_eq!(config.evaluation.weights, GeneratorConfig::default().evaluation.weights);
    Composer::new(&config).unwrap();
}
