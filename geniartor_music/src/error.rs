// Error types for configuration and generation.
//
// `ConfigError` covers everything that can be wrong with user input: the
// JSON config file, note names, tessituras, meters, rhythms, weights. These
// are all detected before the search starts (see `Composer::new` in vns.rs).
//
// `GenerationError` is what the search itself can return. Apart from wrapping
// configuration problems, its only variant is `InternalConsistency`, raised
// when a piece reaching the evaluator breaks the timeline invariants. That
// always means a bug in a move or in the draft builder, so the run aborts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid note name `{0}`")]
    InvalidNoteName(String),

    #[error("unknown scale type `{0}`")]
    UnknownScaleType(String),

    #[error("unsupported meter {beats}/{unit}")]
    UnsupportedMeter { beats: u32, unit: u32 },

    #[error("a piece needs at least one voice")]
    NoVoices,

    #[error("a piece must last at least one measure")]
    ZeroMeasures,

    #[error("voice {voice}: lowest note {low} is above highest note {high}")]
    ContradictoryTessitura {
        voice: usize,
        low: String,
        high: String,
    },

    #[error("voice {voice}: tessitura holds no pitch of the scale")]
    EmptyTessitura { voice: usize },

    #[error("voice {voice}: {reason}")]
    InvalidRhythm { voice: usize, reason: String },

    #[error("rhythmic pattern {index}: {reason}")]
    InvalidPattern { index: usize, reason: String },

    #[error("weight references unknown scoring function `{0}`")]
    UnknownScoringFunction(String),

    #[error("scoring function `{0}` is registered twice")]
    DuplicateScoringFunction(String),

    #[error("weight of `{name}` must be finite and non-negative, got {weight}")]
    InvalidWeight { name: String, weight: f64 },

    #[error("invalid search setting: {0}")]
    InvalidSearch(String),

    #[error("invalid rendering setting: {0}")]
    InvalidRendering(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("internal consistency violation: {0}")]
    InternalConsistency(String),
}
