// Composite evaluation: the scalar fitness the search maximizes.
//
// fitness = sum over registered functions of weight(name) * score(name).
// Functions without a weight (or with weight 0) are never called. Names are
// visited in lexicographic order so floating-point summation is the same on
// every run and every thread.
//
// Before scoring, the piece is checked against the timeline invariants; a
// broken piece aborts with `GenerationError::InternalConsistency` rather than
// receiving a meaningless score.

use crate::error::{ConfigError, GenerationError};
use crate::piece::{Piece, Tick};
use crate::scoring::{ScoringParams, ScoringRegistry};
use crate::sonority::extract_sonorities;
use std::collections::BTreeMap;

/// Scores pieces against a fixed weight vector.
pub struct Evaluator {
    registry: ScoringRegistry,
    /// Only the strictly positive weights, in name order.
    weights: Vec<(&'static str, f64)>,
    custom_positions: BTreeMap<Tick, String>,
}

impl Evaluator {
    /// Build an evaluator, rejecting weights for unknown functions and
    /// weights that are negative or not finite.
    pub fn new(
        registry: ScoringRegistry,
        weights: &BTreeMap<String, f64>,
        custom_positions: BTreeMap<Tick, String>,
    ) -> Result<Self, ConfigError> {
        for (name, &weight) in weights {
            if !registry.contains(name) {
                return Err(ConfigError::UnknownScoringFunction(name.clone()));
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    name: name.clone(),
                    weight,
                });
            }
        }
        let weights = registry
            .names()
            .filter_map(|name| weights.get(name).map(|&w| (name, w)))
            .filter(|&(_, w)| w > 0.0)
            .collect();
        Ok(Evaluator {
            registry,
            weights,
            custom_positions,
        })
    }

    /// Evaluator over the built-in functions.
    pub fn with_params(
        params: &ScoringParams,
        weights: &BTreeMap<String, f64>,
        custom_positions: BTreeMap<Tick, String>,
    ) -> Result<Self, ConfigError> {
        Self::new(ScoringRegistry::with_params(params), weights, custom_positions)
    }

    /// Functions that contribute to the fitness, with their weights.
    pub fn active_weights(&self) -> &[(&'static str, f64)] {
        &self.weights
    }

    pub fn evaluate(&self, piece: &Piece) -> Result<f64, GenerationError> {
        Ok(self.breakdown(piece)?.values().map(|s| s.weighted).sum())
    }

    /// Raw and weighted score of every contributing function.
    pub fn breakdown(
        &self,
        piece: &Piece,
    ) -> Result<BTreeMap<&'static str, FunctionScore>, GenerationError> {
        piece.validate()?;
        let sonorities = extract_sonorities(piece, &self.custom_positions);
        let mut scores = BTreeMap::new();
        for &(name, weight) in &self.weights {
            let Some(function) = self.registry.get(name) else {
                return Err(GenerationError::InternalConsistency(format!(
                    "weighted function `{}` missing from registry",
                    name
                )));
            };
            let raw = function.evaluate(piece, &sonorities);
            log::trace!("{}: {:.4} (weight {})", name, raw, weight);
            scores.insert(
                name,
                FunctionScore {
                    raw,
                    weighted: raw * weight,
                },
            );
        }
        Ok(scores)
    }
}

/// One line of a score breakdown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionScore {
    pub raw: f64,
    pub weighted: f64,
}
