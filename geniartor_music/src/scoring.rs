// Scoring functions: independent, named evaluations of a piece.
//
// Every criterion implements `ScoringFunction` and returns a score in
// [-1, 0], where 0 means nothing to criticize. Criteria are grouped by what
// they look at:
//
// Melodic (per voice): conjunct motion, absence of narrow ranges, climax
//   shape, rhythmic variety, tessitura compliance.
// Vertical (per sonority): absence of large intervals, absence of voice
//   crossing, dominance of tertian harmony, harmonic stability, tonal
//   stability.
// Voice leading (between successive sonorities): absence of parallel
//   intervals.
//
// Functions hold only their parameters, fixed at construction, and never
// mutate anything, so the evaluator may call them in any order or from any
// thread. Degenerate input (a one-note voice, a piece with no sonorities)
// yields the neutral score 0.
//
// `ScoringRegistry` maps names to boxed functions. New criteria are added by
// registering another implementation; evaluation.rs and vns.rs never change.

use crate::error::ConfigError;
use crate::piece::{Piece, Voice};
use crate::scale::Scale;
use crate::sonority::Sonority;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named criterion mapping a piece and its sonorities to a bounded score.
pub trait ScoringFunction: Send + Sync {
    /// Unique name used in weight configuration.
    fn name(&self) -> &'static str;

    fn evaluate(&self, piece: &Piece, sonorities: &[Sonority]) -> f64;
}

pub const CONJUNCT_MOTION: &str = "conjunct_motion";
pub const ABSENCE_OF_LARGE_INTERVALS: &str = "absence_of_large_intervals";
pub const ABSENCE_OF_NARROW_RANGES: &str = "absence_of_narrow_ranges";
pub const ABSENCE_OF_PARALLEL_INTERVALS: &str = "absence_of_parallel_intervals";
pub const ABSENCE_OF_VOICE_CROSSING: &str = "absence_of_voice_crossing";
pub const DOMINANCE_OF_TERTIAN_HARMONY: &str = "dominance_of_tertian_harmony";
pub const HARMONIC_STABILITY: &str = "harmonic_stability";
pub const TONAL_STABILITY: &str = "tonal_stability";
pub const TESSITURA_COMPLIANCE: &str = "tessitura_compliance";
pub const CLIMAX_SHAPE: &str = "climax_shape";
pub const RHYTHMIC_VARIETY: &str = "rhythmic_variety";

// ── Parameters ──

/// Parameters of every built-in scoring function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    pub conjunct_motion: ConjunctMotion,
    pub absence_of_large_intervals: AbsenceOfLargeIntervals,
    pub absence_of_narrow_ranges: AbsenceOfNarrowRanges,
    pub absence_of_parallel_intervals: AbsenceOfParallelIntervals,
    pub harmonic_stability: HarmonicStability,
    pub tonal_stability: TonalStability,
    pub climax_shape: ClimaxShape,
    pub rhythmic_variety: RhythmicVariety,
}

/// Minimum and maximum stability wanted at each position label.
pub type StabilityRanges = BTreeMap<String, (f64, f64)>;

fn ranges(entries: &[(&str, (f64, f64))]) -> StabilityRanges {
    entries
        .iter()
        .map(|&(label, range)| (label.to_string(), range))
        .collect()
}

// ── Registry ──

/// Name → scoring function.
#[derive(Default)]
pub struct ScoringRegistry {
    functions: BTreeMap<&'static str, Box<dyn ScoringFunction>>,
}

impl ScoringRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built-in functions configured with `params`.
    pub fn with_params(params: &ScoringParams) -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Box<dyn ScoringFunction>> = vec![
            Box::new(params.conjunct_motion.clone()),
            Box::new(params.absence_of_large_intervals.clone()),
            Box::new(params.absence_of_narrow_ranges.clone()),
            Box::new(params.absence_of_parallel_intervals.clone()),
            Box::new(AbsenceOfVoiceCrossing),
            Box::new(DominanceOfTertianHarmony),
            Box::new(params.harmonic_stability.clone()),
            Box::new(params.tonal_stability.clone()),
            Box::new(TessituraCompliance),
            Box::new(params.climax_shape.clone()),
            Box::new(params.rhythmic_variety.clone()),
        ];
        for function in builtins {
            registry.functions.insert(function.name(), function);
        }
        registry
    }

    /// Add a function. Fails if the name is already taken.
    pub fn register(&mut self, function: Box<dyn ScoringFunction>) -> Result<(), ConfigError> {
        let name = function.name();
        if self.functions.contains_key(name) {
            return Err(ConfigError::DuplicateScoringFunction(name.to_string()));
        }
        self.functions.insert(name, function);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ScoringFunction> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names in lexicographic order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ── Helpers ──

/// Position in scale steps; chromatic pitches count as the scale pitch below.
fn degree_position(scale: &Scale, pitch: u8) -> i32 {
    let mut p = pitch;
    loop {
        if let Some(position) = scale.position_in_degrees(p) {
            return position;
        }
        if p == 0 {
            return 0;
        }
        p -= 1;
    }
}

/// Mean over voices of a per-voice score; 0 for a piece without voices.
fn mean_over_voices(piece: &Piece, score: impl Fn(&Voice) -> f64) -> f64 {
    if piece.voices.is_empty() {
        return 0.0;
    }
    piece.voices.iter().map(score).sum::<f64>() / piece.voices.len() as f64
}

/// Fraction of sonorities satisfying `flagged`, negated.
fn flagged_fraction(sonorities: &[Sonority], flagged: impl Fn(&Sonority) -> bool) -> f64 {
    if sonorities.is_empty() {
        return 0.0;
    }
    let count = sonorities.iter().filter(|s| flagged(s)).count();
    -(count as f64) / sonorities.len() as f64
}

/// How far `value` falls outside `[min, max]`, as a non-positive number.
fn range_deviation(value: f64, (min, max): (f64, f64)) -> f64 {
    (value - min).min(0.0) + (max - value).min(0.0)
}

/// Duration-weighted mean deviation of per-sonority stability from the
/// range configured for each sonority's position.
fn stability_deviation(
    sonorities: &[Sonority],
    ranges: &StabilityRanges,
    stability: impl Fn(&Sonority) -> Option<f64>,
) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for sonority in sonorities {
        let Some(value) = stability(sonority) else {
            continue;
        };
        let duration = sonority.duration() as f64;
        if let Some(&range) = ranges.get(sonority.position.label()) {
            weighted += duration * range_deviation(value, range);
        }
        total += duration;
    }
    if total > 0.0 { weighted / total } else { 0.0 }
}

// ── Melodic criteria ──

/// Melodic smoothness: penalizes leaps between consecutive notes of a voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConjunctMotion {
    /// Penalty amount forgiven per voice before normalizing.
    pub penalty_deduction_per_line: f64,
    /// Penalty per melodic interval size in semitones; unlisted sizes cost 1.
    pub n_semitones_to_penalty: BTreeMap<u8, f64>,
}

impl Default for ConjunctMotion {
    fn default() -> Self {
        ConjunctMotion {
            penalty_deduction_per_line: 0.2,
            n_semitones_to_penalty: [
                (0, 0.0),
                (1, 0.0),
                (2, 0.0),
                (3, 0.1),
                (4, 0.2),
                (5, 0.3),
                (6, 0.4),
                (7, 0.5),
                (8, 0.6),
                (9, 0.7),
                (10, 0.8),
                (11, 0.9),
                (12, 1.0),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl ScoringFunction for ConjunctMotion {
    fn name(&self) -> &'static str {
        CONJUNCT_MOTION
    }

    fn evaluate(&self, piece: &Piece, _sonorities: &[Sonority]) -> f64 {
        mean_over_voices(piece, |voice| {
            if voice.notes.len() < 2 {
                return 0.0;
            }
            let penalty: f64 = voice
                .notes
                .windows(2)
                .map(|w| {
                    let interval = (w[1].pitch as i16 - w[0].pitch as i16).unsigned_abs();
                    u8::try_from(interval)
                        .ok()
                        .and_then(|iv| self.n_semitones_to_penalty.get(&iv))
                        .copied()
                        .unwrap_or(1.0)
                })
                .sum();
            let score = (self.penalty_deduction_per_line - penalty).min(0.0);
            score / (voice.notes.len() - 1) as f64
        })
    }
}

/// Melodic fluency: penalizes stalling inside a narrow range of degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsenceOfNarrowRanges {
    /// Window width in notes.
    pub range_size: usize,
    /// Penalty keyed by a range width in scale degrees; applies to windows
    /// at most that wide (the largest applicable penalty wins).
    pub penalties: BTreeMap<i32, f64>,
}

impl Default for AbsenceOfNarrowRanges {
    fn default() -> Self {
        AbsenceOfNarrowRanges {
            range_size: 9,
            penalties: [(2, 1.0), (3, 0.5)].into_iter().collect(),
        }
    }
}

impl ScoringFunction for AbsenceOfNarrowRanges {
    fn name(&self) -> &'static str {
        ABSENCE_OF_NARROW_RANGES
    }

    fn evaluate(&self, piece: &Piece, _sonorities: &[Sonority]) -> f64 {
        if self.range_size == 0 {
            return 0.0;
        }
        mean_over_voices(piece, |voice| {
            let positions: Vec<i32> = voice
                .notes
                .iter()
                .map(|n| degree_position(&piece.scale, n.pitch))
                .collect();
            let windows: Vec<&[i32]> = positions.windows(self.range_size).collect();
            if windows.is_empty() {
                return 0.0;
            }
            let total: f64 = windows
                .iter()
                .map(|window| {
                    let low = window.iter().copied().min().unwrap_or(0);
                    let high = window.iter().copied().max().unwrap_or(0);
                    self.penalties
                        .range(high - low..)
                        .map(|(_, &p)| p)
                        .fold(0.0, f64::max)
                })
                .sum();
            -(total / windows.len() as f64).min(1.0)
        })
    }
}

/// Registral range: fraction of notes outside their voice's tessitura.
#[derive(Debug, Clone, Copy, Default)]
pub struct TessituraCompliance;

impl ScoringFunction for TessituraCompliance {
    fn name(&self) -> &'static str {
        TESSITURA_COMPLIANCE
    }

    fn evaluate(&self, piece: &Piece, _sonorities: &[Sonority]) -> f64 {
        let total = piece.num_notes();
        if total == 0 {
            return 0.0;
        }
        let outside = piece
            .voices
            .iter()
            .flat_map(|v| v.notes.iter().map(move |n| (v.tessitura, n.pitch)))
            .filter(|(tessitura, pitch)| !tessitura.contains(*pitch))
            .count();
        -(outside as f64) / total as f64
    }
}

/// Contour: each voice should have one clear high point, placed within a
/// preferred stretch of the phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimaxShape {
    /// Preferred relative position of the first climax, inclusive.
    pub preferred_window: (f64, f64),
}

impl Default for ClimaxShape {
    fn default() -> Self {
        ClimaxShape {
            preferred_window: (0.3, 0.7),
        }
    }
}

impl ScoringFunction for ClimaxShape {
    fn name(&self) -> &'static str {
        CLIMAX_SHAPE
    }

    fn evaluate(&self, piece: &Piece, _sonorities: &[Sonority]) -> f64 {
        mean_over_voices(piece, |voice| {
            let notes = &voice.notes;
            let (Some(first), Some(last)) = (notes.first(), notes.last()) else {
                return 0.0;
            };
            if notes.len() < 2 || last.onset == first.onset {
                return 0.0;
            }
            let top = notes.iter().map(|n| n.pitch).max().unwrap_or(0);
            let count = notes.iter().filter(|n| n.pitch == top).count();
            let repeat = (count - 1) as f64 / (notes.len() - 1) as f64;

            let climax_onset = notes
                .iter()
                .find(|n| n.pitch == top)
                .map(|n| n.onset)
                .unwrap_or(first.onset);
            let position =
                (climax_onset - first.onset) as f64 / (last.onset - first.onset) as f64;
            let (low, high) = self.preferred_window;
            let misplaced = if (low..=high).contains(&position) { 0.0 } else { 1.0 };

            -0.5 * repeat - 0.5 * misplaced
        })
    }
}

/// Rhythm: rewards using several different durations within a voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmicVariety {
    /// Number of distinct durations that counts as full variety.
    pub vocabulary_size: usize,
}

impl Default for RhythmicVariety {
    fn default() -> Self {
        RhythmicVariety { vocabulary_size: 3 }
    }
}

impl ScoringFunction for RhythmicVariety {
    fn name(&self) -> &'static str {
        RHYTHMIC_VARIETY
    }

    fn evaluate(&self, piece: &Piece, _sonorities: &[Sonority]) -> f64 {
        mean_over_voices(piece, |voice| {
            let target = voice.notes.len().min(self.vocabulary_size);
            if target < 2 {
                return 0.0;
            }
            let mut durations = voice.durations();
            durations.sort_unstable();
            durations.dedup();
            let variety = (durations.len() - 1) as f64 / (target - 1) as f64;
            -(1.0 - variety.min(1.0))
        })
    }
}

// ── Vertical criteria ──

/// Spacing: penalizes sonorities where adjacent voices are too far apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsenceOfLargeIntervals {
    pub max_n_semitones: u8,
}

impl Default for AbsenceOfLargeIntervals {
    fn default() -> Self {
        AbsenceOfLargeIntervals { max_n_semitones: 16 }
    }
}

impl ScoringFunction for AbsenceOfLargeIntervals {
    fn name(&self) -> &'static str {
        ABSENCE_OF_LARGE_INTERVALS
    }

    fn evaluate(&self, _piece: &Piece, sonorities: &[Sonority]) -> f64 {
        flagged_fraction(sonorities, |sonority| {
            sonority.notes.windows(2).any(|pair| {
                let gap = (pair[1].pitch as i16 - pair[0].pitch as i16).unsigned_abs();
                gap > self.max_n_semitones as u16
            })
        })
    }
}

/// Voice order: penalizes sonorities where a voice is at or above the next
/// higher voice.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbsenceOfVoiceCrossing;

impl ScoringFunction for AbsenceOfVoiceCrossing {
    fn name(&self) -> &'static str {
        ABSENCE_OF_VOICE_CROSSING
    }

    fn evaluate(&self, _piece: &Piece, sonorities: &[Sonority]) -> f64 {
        flagged_fraction(sonorities, |sonority| {
            sonority
                .notes
                .windows(2)
                .any(|pair| pair[0].pitch >= pair[1].pitch)
        })
    }
}

/// Tertian harmony: the degrees of a sonority should form one unbroken arc
/// on the circle of thirds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DominanceOfTertianHarmony;

const CIRCLE_OF_THIRDS: [u8; 7] = [1, 3, 5, 7, 2, 4, 6];

impl ScoringFunction for DominanceOfTertianHarmony {
    fn name(&self) -> &'static str {
        DOMINANCE_OF_TERTIAN_HARMONY
    }

    fn evaluate(&self, piece: &Piece, sonorities: &[Sonority]) -> f64 {
        flagged_fraction(sonorities, |sonority| {
            let degrees: Vec<u8> = sonority
                .pitches()
                .filter_map(|p| piece.scale.degree(p))
                .collect();
            let active: Vec<bool> = CIRCLE_OF_THIRDS.iter().map(|d| degrees.contains(d)).collect();
            // An unbroken arc switches between active and inactive at most twice.
            let changes = (0..active.len())
                .filter(|&i| active[i] != active[(i + active.len() - 1) % active.len()])
                .count();
            changes > 2
        })
    }
}

/// Harmonic stability: mean stability of the intervals within a sonority
/// should stay inside the range wanted at its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonicStability {
    pub stability_ranges: StabilityRanges,
    /// Stability of an interval class (semitones mod 12).
    pub n_semitones_to_stability: BTreeMap<u8, f64>,
}

impl Default for HarmonicStability {
    fn default() -> Self {
        HarmonicStability {
            stability_ranges: ranges(&[
                ("beginning", (0.8, 1.0)),
                ("ending", (0.9, 1.0)),
                ("downbeat", (0.75, 1.0)),
                ("middle", (0.5, 0.9)),
                ("other", (0.25, 0.8)),
            ]),
            n_semitones_to_stability: [
                (0, 1.0),
                (1, 0.2),
                (2, 0.2),
                (3, 0.7),
                (4, 0.8),
                (5, 0.5),
                (6, 0.0),
                (7, 0.9),
                (8, 0.6),
                (9, 0.6),
                (10, 0.2),
                (11, 0.2),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl HarmonicStability {
    /// Mean stability over all note pairs; a lone note is fully stable.
    pub fn sonority_stability(&self, sonority: &Sonority) -> f64 {
        let pitches: Vec<u8> = sonority.pitches().collect();
        let mut total = 0.0;
        let mut pairs = 0usize;
        for i in 0..pitches.len() {
            for j in (i + 1)..pitches.len() {
                let class = ((pitches[j] as i16 - pitches[i] as i16).unsigned_abs() % 12) as u8;
                total += self.n_semitones_to_stability.get(&class).copied().unwrap_or(0.0);
                pairs += 1;
            }
        }
        if pairs == 0 { 1.0 } else { total / pairs as f64 }
    }
}

impl ScoringFunction for HarmonicStability {
    fn name(&self) -> &'static str {
        HARMONIC_STABILITY
    }

    fn evaluate(&self, _piece: &Piece, sonorities: &[Sonority]) -> f64 {
        stability_deviation(sonorities, &self.stability_ranges, |sonority| {
            if sonority.notes.is_empty() {
                None
            } else {
                Some(self.sonority_stability(sonority))
            }
        })
    }
}

/// Tonal stability: mean stability of the scale degrees in a sonority should
/// stay inside the range wanted at its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TonalStability {
    pub stability_ranges: StabilityRanges,
    /// Stability of scale degrees 1-7; chromatic pitches count as 0.
    pub degree_to_stability: BTreeMap<u8, f64>,
}

impl Default for TonalStability {
    fn default() -> Self {
        TonalStability {
            stability_ranges: ranges(&[
                ("beginning", (0.8, 1.0)),
                ("ending", (0.9, 1.0)),
                ("downbeat", (0.6, 1.0)),
                ("middle", (0.4, 1.0)),
                ("other", (0.2, 1.0)),
            ]),
            degree_to_stability: [
                (1, 1.0),
                (2, 0.4),
                (3, 0.7),
                (4, 0.4),
                (5, 0.8),
                (6, 0.4),
                (7, 0.0),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl ScoringFunction for TonalStability {
    fn name(&self) -> &'static str {
        TONAL_STABILITY
    }

    fn evaluate(&self, piece: &Piece, sonorities: &[Sonority]) -> f64 {
        stability_deviation(sonorities, &self.stability_ranges, |sonority| {
            if sonority.notes.is_empty() {
                return None;
            }
            let total: f64 = sonority
                .pitches()
                .map(|p| {
                    piece
                        .scale
                        .degree(p)
                        .and_then(|d| self.degree_to_stability.get(&d))
                        .copied()
                        .unwrap_or(0.0)
                })
                .sum();
            Some(total / sonority.notes.len() as f64)
        })
    }
}

// ── Voice leading ──

/// Parallel motion: between successive sonorities, an adjacent voice pair
/// in which both notes change but the interval (in scale degrees) stays the
/// same is penalized according to the interval size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbsenceOfParallelIntervals {
    /// Penalty per interval size in scale degrees (4 = fifth, 7 = octave).
    pub n_degrees_to_penalty: BTreeMap<i32, f64>,
}

impl Default for AbsenceOfParallelIntervals {
    fn default() -> Self {
        AbsenceOfParallelIntervals {
            n_degrees_to_penalty: [(4, 1.0), (7, 1.0), (0, 1.0)].into_iter().collect(),
        }
    }
}

impl ScoringFunction for AbsenceOfParallelIntervals {
    fn name(&self) -> &'static str {
        ABSENCE_OF_PARALLEL_INTERVALS
    }

    fn evaluate(&self, piece: &Piece, sonorities: &[Sonority]) -> f64 {
        if sonorities.len() < 2 {
            return 0.0;
        }
        let mut penalty = 0.0;
        for pair in sonorities.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            for (prev, next) in before.notes.windows(2).zip(after.notes.windows(2)) {
                let lower_moved = prev[0].index != next[0].index;
                let upper_moved = prev[1].index != next[1].index;
                if !(lower_moved && upper_moved) {
                    continue;
                }
                let interval = |notes: &[crate::sonority::SoundingNote]| {
                    degree_position(&piece.scale, notes[1].pitch)
                        - degree_position(&piece.scale, notes[0].pitch)
                };
                let size = interval(prev);
                if size == interval(next) {
                    penalty += self.n_degrees_to_penalty.get(&size).copied().unwrap_or(0.0);
                }
            }
        }
        -penalty / (sonorities.len() - 1) as f64
    }
}
