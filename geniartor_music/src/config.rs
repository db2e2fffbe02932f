// Generator configuration, loaded from JSON.
//
// `GeneratorConfig` has four sections mirroring the pipeline: the piece's
// structural constraints, the evaluation weights and scoring parameters, the
// search budget, and rendering settings for the MIDI writer. Every field has
// a default, so a config file only needs the values it changes.
//
// The raw `PieceConstraints` speak the user's language (note names, scale
// type names). `PieceConstraints::resolve` checks them and produces
// `Constraints`: parsed pitches, per-voice candidate pitch lists and rhythm
// rules, ready for the draft builder and the neighborhood generator. Every
// configuration problem surfaces here as a `ConfigError`, before a search
// can start.

use crate::error::ConfigError;
use crate::midi::RenderingConfig;
use crate::piece::{Meter, Tessitura, Tick};
use crate::rhythm::RhythmRules;
use crate::scale::{Scale, ScaleType, parse_note_name, parse_pitch_class, pitch_name};
use crate::scoring::{self, ScoringParams};
use crate::vns::SearchConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Complete generator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub piece: PieceConstraints,
    pub evaluation: EvaluationConfig,
    pub search: SearchConfig,
    pub rendering: RenderingConfig,
}

impl GeneratorConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Structural constraints of the piece to generate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PieceConstraints {
    /// Tonic pitch class name, e.g. "C" or "F#".
    pub tonic: String,
    pub scale_type: String,
    pub meter: Meter,
    pub n_measures: u32,
    /// Voices from lowest to highest.
    pub voices: Vec<VoiceConstraints>,
    /// Valid divisions of one measure, in ticks. Empty allows any division.
    pub rhythmic_patterns: Vec<Vec<Tick>>,
    /// Relative probability of each duration when generating rhythms.
    pub duration_weights: BTreeMap<Tick, f64>,
    pub end_with_whole_note: bool,
    /// Position labels overriding the metric ones, keyed by start tick.
    pub custom_position_types: BTreeMap<Tick, String>,
}

impl Default for PieceConstraints {
    fn default() -> Self {
        PieceConstraints {
            tonic: "C".to_string(),
            scale_type: "major".to_string(),
            meter: Meter::common_time(),
            n_measures: 4,
            voices: vec![
                VoiceConstraints::new("C3", "C4"),
                VoiceConstraints::new("G3", "G4"),
                VoiceConstraints::new("C4", "C5"),
            ],
            rhythmic_patterns: vec![
                vec![8],
                vec![4, 4],
                vec![4, 2, 2],
                vec![2, 2, 4],
                vec![2, 2, 2, 2],
                vec![6, 2],
                vec![4, 8],
            ],
            duration_weights: [(2, 0.3), (4, 1.0), (6, 0.2), (8, 0.5)].into_iter().collect(),
            end_with_whole_note: true,
            custom_position_types: BTreeMap::new(),
        }
    }
}

/// Constraints of one voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConstraints {
    pub lowest_note: String,
    pub highest_note: String,
    /// Allowed note durations in ticks; defaults to eighth, quarter, half
    /// and whole notes that fit the meter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_durations: Option<Vec<Tick>>,
    /// A fixed rhythm. The search then changes only this voice's pitches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durations: Option<Vec<Tick>>,
}

impl VoiceConstraints {
    pub fn new(lowest_note: &str, highest_note: &str) -> Self {
        VoiceConstraints {
            lowest_note: lowest_note.to_string(),
            highest_note: highest_note.to_string(),
            allowed_durations: None,
            durations: None,
        }
    }
}

/// Weights and scoring-function parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Scoring-function name to weight; unlisted functions weigh 0.
    pub weights: BTreeMap<String, f64>,
    pub params: ScoringParams,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        let weights = [
            (scoring::CONJUNCT_MOTION, 1.0),
            (scoring::ABSENCE_OF_LARGE_INTERVALS, 1.0),
            (scoring::ABSENCE_OF_NARROW_RANGES, 1.0),
            (scoring::ABSENCE_OF_PARALLEL_INTERVALS, 1.0),
            (scoring::ABSENCE_OF_VOICE_CROSSING, 2.0),
            (scoring::DOMINANCE_OF_TERTIAN_HARMONY, 1.0),
            (scoring::HARMONIC_STABILITY, 2.0),
            (scoring::TONAL_STABILITY, 1.0),
            (scoring::TESSITURA_COMPLIANCE, 1.0),
            (scoring::CLIMAX_SHAPE, 0.5),
            (scoring::RHYTHMIC_VARIETY, 0.5),
        ];
        EvaluationConfig {
            weights: weights.iter().map(|&(n, w)| (n.to_string(), w)).collect(),
            params: ScoringParams::default(),
        }
    }
}

/// Resolved rules of one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceRules {
    pub tessitura: Tessitura,
    /// Scale pitches inside the tessitura, ascending.
    pub pitches: Vec<u8>,
    pub rhythm: RhythmRules,
    pub fixed_durations: Option<Vec<Tick>>,
}

impl VoiceRules {
    /// Whether moves may change this voice's rhythm.
    pub fn rhythm_is_free(&self) -> bool {
        self.fixed_durations.is_none()
    }
}

/// Validated piece constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraints {
    pub scale: Scale,
    pub meter: Meter,
    pub n_measures: u32,
    pub voices: Vec<VoiceRules>,
    pub duration_weights: BTreeMap<Tick, f64>,
    pub custom_positions: BTreeMap<Tick, String>,
}

impl Constraints {
    pub fn length(&self) -> Tick {
        self.n_measures * self.meter.ticks_per_measure()
    }
}

impl PieceConstraints {
    /// Check the constraints and resolve names into pitches and rules.
    pub fn resolve(&self) -> Result<Constraints, ConfigError> {
        self.meter.check()?;
        if self.n_measures == 0 {
            return Err(ConfigError::ZeroMeasures);
        }
        if self.voices.is_empty() {
            return Err(ConfigError::NoVoices);
        }
        let scale_type: ScaleType = self.scale_type.parse()?;
        let scale = Scale::new(parse_pitch_class(&self.tonic)?, scale_type);
        let tpm = self.meter.ticks_per_measure();
        let length = self.n_measures * tpm;

        for (index, pattern) in self.rhythmic_patterns.iter().enumerate() {
            let invalid = |reason: &str| ConfigError::InvalidPattern {
                index,
                reason: reason.to_string(),
            };
            if pattern.is_empty() {
                return Err(invalid("pattern is empty"));
            }
            if pattern.contains(&0) {
                return Err(invalid("pattern contains a zero duration"));
            }
            let body: Tick = pattern[..pattern.len() - 1].iter().sum();
            if body >= tpm {
                return Err(invalid("pattern overfills the measure before its last note"));
            }
        }
        for (&duration, &weight) in &self.duration_weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    name: format!("duration {}", duration),
                    weight,
                });
            }
        }

        let mut voices = Vec::with_capacity(self.voices.len());
        for (vi, voice) in self.voices.iter().enumerate() {
            voices.push(self.resolve_voice(vi, voice, &scale, tpm, length)?);
        }

        Ok(Constraints {
            scale,
            meter: self.meter,
            n_measures: self.n_measures,
            voices,
            duration_weights: self.duration_weights.clone(),
            custom_positions: self.custom_position_types.clone(),
        })
    }

    fn resolve_voice(
        &self,
        vi: usize,
        voice: &VoiceConstraints,
        scale: &Scale,
        tpm: Tick,
        length: Tick,
    ) -> Result<VoiceRules, ConfigError> {
        let low = parse_note_name(&voice.lowest_note)?;
        let high = parse_note_name(&voice.highest_note)?;
        if low > high {
            return Err(ConfigError::ContradictoryTessitura {
                voice: vi,
                low: pitch_name(low),
                high: pitch_name(high),
            });
        }
        let pitches = scale.pitches_in_range(low, high);
        if pitches.is_empty() {
            return Err(ConfigError::EmptyTessitura { voice: vi });
        }

        let invalid = |reason: String| ConfigError::InvalidRhythm { voice: vi, reason };
        let allowed = match (&voice.allowed_durations, &voice.durations) {
            (Some(allowed), _) => {
                if allowed.is_empty() || allowed.contains(&0) {
                    return Err(invalid("allowed durations must be non-empty and positive".to_string()));
                }
                allowed.clone()
            }
            (None, Some(fixed)) => fixed.clone(),
            (None, None) if self.rhythmic_patterns.is_empty() => RhythmRules::default_durations(tpm),
            // Only durations some pattern uses can ever appear.
            (None, None) => self.rhythmic_patterns.iter().flatten().copied().collect(),
        };
        let rhythm = RhythmRules::new(
            allowed,
            self.rhythmic_patterns.clone(),
            tpm,
            self.end_with_whole_note,
        );

        match &voice.durations {
            Some(fixed) => rhythm.check_line(fixed, length).map_err(invalid)?,
            None => {
                if !rhythm.is_satisfiable(length) {
                    return Err(invalid(format!(
                        "allowed durations {:?} and the rhythmic patterns cannot fill {} ticks",
                        rhythm.allowed_durations, length
                    )));
                }
            }
        }

        Ok(VoiceRules {
            tessitura: Tessitura { low, high },
            pitches,
            rhythm,
            fixed_durations: voice.durations.clone(),
        })
    }
}
