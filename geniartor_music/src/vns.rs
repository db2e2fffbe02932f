// Variable Neighborhood Search over pieces.
//
// One run is an explicit state machine (`VnsState`):
//
//   Initializing -> Shaking(1) -> LocalSearch(k) -> Accepting
//        |             ^                               |   \
//        |             |  improved: k = 1              |    Escalating
//        |             +-------------------------------+    |  k += 1; past k_max:
//        |             +------------------------------------+  k = 1, one pass used
//        v
//   Terminated (zero passes left, or the shake budget is spent)
//
// Shaking draws a random neighbor of order k (neighborhood.rs). Local search
// is best-improvement hill climbing over order-1 moves. A candidate replaces
// the incumbent only if it is strictly better, so the incumbent's fitness
// never decreases and ties keep the incumbent.
//
// A run owns its incumbent and one seeded `StdRng`; given a seed it is fully
// deterministic. `Composer::search` launches several runs with seeds
// seed, seed + 1, ... on the rayon pool and keeps the best result, breaking
// ties by the lowest run index.

use crate::config::{Constraints, GeneratorConfig};
use crate::draft::build_draft;
use crate::error::{ConfigError, GenerationError};
use crate::evaluation::Evaluator;
use crate::neighborhood::{MoveWeights, Neighborhood};
use crate::piece::Piece;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Search budget and move settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Full sweeps through neighborhoods 1..=k_max without improvement
    /// before stopping.
    pub n_passes: usize,
    /// Largest neighborhood order.
    pub k_max: usize,
    /// Maximum number of improving moves per local search.
    pub local_search_budget: usize,
    /// Fraction of order-1 moves examined per local search step, in (0, 1].
    pub local_search_fraction: f64,
    /// Redraws of a rejected random move before its slot is dropped.
    pub move_retry_budget: usize,
    pub move_weights: MoveWeights,
    pub seed: u64,
    /// Independent runs; the best result wins.
    pub n_runs: usize,
    /// Optional cap on the number of shakes per run.
    pub max_shakes: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            n_passes: 10,
            k_max: 3,
            local_search_budget: 100,
            local_search_fraction: 0.5,
            move_retry_budget: 10,
            move_weights: MoveWeights::default(),
            seed: 0,
            n_runs: 4,
            max_shakes: None,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.k_max == 0 {
            return Err(ConfigError::InvalidSearch("k_max must be at least 1".to_string()));
        }
        if self.n_runs == 0 {
            return Err(ConfigError::InvalidSearch("n_runs must be at least 1".to_string()));
        }
        let fraction = self.local_search_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidSearch(format!(
                "local_search_fraction must be in (0, 1], got {}",
                fraction
            )));
        }
        Ok(())
    }
}

/// States of one VNS run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnsState {
    Initializing,
    Shaking(usize),
    LocalSearch(usize),
    Accepting,
    Escalating,
    Terminated,
}

/// A piece with its fitness.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub piece: Piece,
    pub fitness: f64,
}

/// Counters collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub shakes: usize,
    /// Shakes that applied fewer moves than their order.
    pub degraded_shakes: usize,
    pub local_search_moves: usize,
    pub improvements: usize,
    pub passes_completed: usize,
}

/// Outcome of a run (or of the best of several runs).
#[derive(Debug, Clone)]
pub struct VnsResult {
    pub piece: Piece,
    pub fitness: f64,
    pub initial_fitness: f64,
    /// Incumbent fitness after initialization and after every acceptance
    /// step.
    pub trace: Vec<f64>,
    pub stats: SearchStats,
    pub seed: u64,
}

/// Everything a search needs, validated once.
pub struct Composer {
    constraints: Constraints,
    evaluator: Evaluator,
    neighborhood: Neighborhood,
    search: SearchConfig,
}

impl Composer {
    /// Check the whole configuration. No search starts if this fails.
    pub fn new(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        let constraints = config.piece.resolve()?;
        let evaluator = Evaluator::with_params(
            &config.evaluation.params,
            &config.evaluation.weights,
            constraints.custom_positions.clone(),
        )?;
        Self::from_parts(constraints, evaluator, config.search.clone())
    }

    /// Assemble from already-resolved parts, e.g. with a custom scoring
    /// registry.
    pub fn from_parts(
        constraints: Constraints,
        evaluator: Evaluator,
        search: SearchConfig,
    ) -> Result<Self, ConfigError> {
        search.validate()?;
        let neighborhood = Neighborhood::new(
            constraints.voices.clone(),
            search.move_weights,
            search.move_retry_budget,
        )?;
        Ok(Composer {
            constraints,
            evaluator,
            neighborhood,
            search,
        })
    }

    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search
    }

    /// One run from a random draft.
    pub fn run(&self, seed: u64) -> Result<VnsResult, GenerationError> {
        VnsRun::new(self, None, seed)?.finish()
    }

    /// One run starting from the given piece.
    pub fn run_from(&self, piece: Piece, seed: u64) -> Result<VnsResult, GenerationError> {
        VnsRun::new(self, Some(piece), seed)?.finish()
    }

    /// `n_runs` independent runs in parallel; the best fitness wins, ties go
    /// to the lowest run index.
    pub fn search(&self) -> Result<VnsResult, GenerationError> {
        let base = self.search.seed;
        log::info!("starting {} runs from seed {}", self.search.n_runs, base);
        let results: Vec<VnsResult> = (0..self.search.n_runs)
            .into_par_iter()
            .map(|i| self.run(base.wrapping_add(i as u64)))
            .collect::<Result<_, _>>()?;
        let mut best: Option<VnsResult> = None;
        for result in results {
            if best.as_ref().is_none_or(|b| result.fitness > b.fitness) {
                best = Some(result);
            }
        }
        best.ok_or_else(|| GenerationError::InternalConsistency("no run produced a result".to_string()))
    }
}

/// A single run, advanced one state transition at a time.
pub struct VnsRun<'a> {
    composer: &'a Composer,
    rng: StdRng,
    seed: u64,
    state: VnsState,
    start: Option<Piece>,
    incumbent: Option<Candidate>,
    candidate: Option<Candidate>,
    initial_fitness: f64,
    k: usize,
    passes_left: usize,
    trace: Vec<f64>,
    stats: SearchStats,
}

impl<'a> VnsRun<'a> {
    pub fn new(composer: &'a Composer, start: Option<Piece>, seed: u64) -> Result<Self, GenerationError> {
        if let Some(piece) = &start {
            check_start(&composer.constraints, piece)?;
        }
        Ok(VnsRun {
            composer,
            rng: StdRng::seed_from_u64(seed),
            seed,
            state: VnsState::Initializing,
            start,
            incumbent: None,
            candidate: None,
            initial_fitness: 0.0,
            k: 1,
            passes_left: composer.search.n_passes,
            trace: Vec::new(),
            stats: SearchStats::default(),
        })
    }

    pub fn state(&self) -> VnsState {
        self.state
    }

    pub fn incumbent(&self) -> Option<&Candidate> {
        self.incumbent.as_ref()
    }

    /// Perform the current state's work and move to the next state.
    pub fn step(&mut self) -> Result<VnsState, GenerationError> {
        let composer = self.composer;
        let search = &composer.search;
        self.state = match self.state {
            VnsState::Initializing => {
                let piece = match self.start.take() {
                    Some(piece) => piece,
                    None => build_draft(&composer.constraints, &mut self.rng)?,
                };
                let fitness = composer.evaluator.evaluate(&piece)?;
                log::info!("run {}: initial fitness {:.4}", self.seed, fitness);
                self.initial_fitness = fitness;
                self.trace.push(fitness);
                self.incumbent = Some(Candidate { piece, fitness });
                self.k = 1;
                if self.passes_left == 0 {
                    VnsState::Terminated
                } else {
                    VnsState::Shaking(1)
                }
            }
            VnsState::Shaking(k) => {
                if search.max_shakes.is_some_and(|max| self.stats.shakes >= max) {
                    VnsState::Terminated
                } else {
                    let Some(incumbent) = self.incumbent.as_ref() else {
                        return Err(no_incumbent());
                    };
                    let shaken = composer.neighborhood.shake(&incumbent.piece, k, &mut self.rng);
                    self.stats.shakes += 1;
                    if shaken.applied < k {
                        self.stats.degraded_shakes += 1;
                    }
                    let fitness = composer.evaluator.evaluate(&shaken.piece)?;
                    self.candidate = Some(Candidate {
                        piece: shaken.piece,
                        fitness,
                    });
                    VnsState::LocalSearch(k)
                }
            }
            VnsState::LocalSearch(_) => {
                if let Some(start) = self.candidate.take() {
                    self.candidate = Some(self.local_search(start)?);
                }
                VnsState::Accepting
            }
            VnsState::Accepting => {
                let candidate = self.candidate.take();
                let incumbent_fitness = self.current()?.fitness;
                let next = match candidate {
                    Some(c) if c.fitness > incumbent_fitness => {
                        log::debug!(
                            "run {}: improved {:.4} -> {:.4} in neighborhood {}",
                            self.seed,
                            incumbent_fitness,
                            c.fitness,
                            self.k
                        );
                        self.incumbent = Some(c);
                        self.stats.improvements += 1;
                        self.k = 1;
                        VnsState::Shaking(1)
                    }
                    _ => VnsState::Escalating,
                };
                self.trace.push(self.current()?.fitness);
                next
            }
            VnsState::Escalating => {
                self.k += 1;
                if self.k > search.k_max {
                    self.k = 1;
                    self.passes_left -= 1;
                    self.stats.passes_completed += 1;
                    log::info!(
                        "run {}: pass {} of {} done, fitness {:.4}",
                        self.seed,
                        self.stats.passes_completed,
                        search.n_passes,
                        self.current()?.fitness
                    );
                }
                if self.passes_left == 0 {
                    VnsState::Terminated
                } else {
                    VnsState::Shaking(self.k)
                }
            }
            VnsState::Terminated => VnsState::Terminated,
        };
        Ok(self.state)
    }

    fn current(&self) -> Result<&Candidate, GenerationError> {
        self.incumbent.as_ref().ok_or_else(no_incumbent)
    }

    /// Best-improvement hill climbing over order-1 moves.
    fn local_search(&mut self, start: Candidate) -> Result<Candidate, GenerationError> {
        let composer = self.composer;
        let search = &composer.search;
        let hood = &composer.neighborhood;
        let mut current = start;
        let mut applied = 0;
        while applied < search.local_search_budget {
            let mut moves = hood.all_moves(&current.piece);
            if search.local_search_fraction < 1.0 {
                moves.shuffle(&mut self.rng);
                let keep = (moves.len() as f64 * search.local_search_fraction).ceil() as usize;
                moves.truncate(keep.max(1));
            }
            let mut best: Option<Candidate> = None;
            for mv in &moves {
                let Some(piece) = hood.apply(&current.piece, mv) else {
                    continue;
                };
                let fitness = composer.evaluator.evaluate(&piece)?;
                let to_beat = best.as_ref().map_or(current.fitness, |b| b.fitness);
                if fitness > to_beat {
                    best = Some(Candidate { piece, fitness });
                }
            }
            match best {
                Some(better) => {
                    current = better;
                    applied += 1;
                }
                None => break,
            }
        }
        self.stats.local_search_moves += applied;
        Ok(current)
    }

    /// Run to termination.
    pub fn finish(mut self) -> Result<VnsResult, GenerationError> {
        while self.step()? != VnsState::Terminated {}
        let Candidate { piece, fitness } = self.incumbent.take().ok_or_else(no_incumbent)?;
        log::info!(
            "run {}: finished with fitness {:.4} after {} shakes ({} improvements)",
            self.seed,
            fitness,
            self.stats.shakes,
            self.stats.improvements
        );
        if self.stats.degraded_shakes > 0 {
            log::info!(
                "run {}: {} of {} shakes applied fewer moves than their order",
                self.seed,
                self.stats.degraded_shakes,
                self.stats.shakes
            );
        }
        Ok(VnsResult {
            piece,
            fitness,
            initial_fitness: self.initial_fitness,
            trace: self.trace,
            stats: self.stats,
            seed: self.seed,
        })
    }
}

/// A caller-supplied starting piece must already satisfy every constraint:
/// the search only ever moves between valid pieces.
fn check_start(constraints: &Constraints, piece: &Piece) -> Result<(), ConfigError> {
    let invalid = |msg: String| Err(ConfigError::InvalidSearch(format!("starting piece: {}", msg)));
    if piece.scale != constraints.scale {
        return invalid(format!("scale {:?} differs from {:?}", piece.scale, constraints.scale));
    }
    if piece.meter != constraints.meter || piece.n_measures != constraints.n_measures {
        return invalid(format!(
            "{} measures of {}/{} instead of {} measures of {}/{}",
            piece.n_measures,
            piece.meter.beats_per_measure,
            piece.meter.beat_unit,
            constraints.n_measures,
            constraints.meter.beats_per_measure,
            constraints.meter.beat_unit
        ));
    }
    if piece.voices.len() != constraints.voices.len() {
        return invalid(format!(
            "{} voices, constraints describe {}",
            piece.voices.len(),
            constraints.voices.len()
        ));
    }
    if let Err(e) = piece.validate() {
        return invalid(e.to_string());
    }
    let length = constraints.length();
    for (vi, (voice, rules)) in piece.voices.iter().zip(&constraints.voices).enumerate() {
        if voice.tessitura != rules.tessitura {
            return invalid(format!(
                "voice {} has tessitura {:?}, expected {:?}",
                vi, voice.tessitura, rules.tessitura
            ));
        }
        if let Some(note) = voice.notes.iter().find(|n| rules.pitches.binary_search(&n.pitch).is_err()) {
            return invalid(format!(
                "voice {}: pitch {} is outside the scale or tessitura",
                vi, note.pitch
            ));
        }
        let durations = voice.durations();
        if let Some(fixed) = &rules.fixed_durations {
            if &durations != fixed {
                return invalid(format!("voice {}: rhythm {:?} differs from fixed {:?}", vi, durations, fixed));
            }
        }
        if let Err(reason) = rules.rhythm.check_line(&durations, length) {
            return invalid(format!("voice {}: {}", vi, reason));
        }
    }
    Ok(())
}

fn no_incumbent() -> GenerationError {
    GenerationError::InternalConsistency("no incumbent before initialization".to_string())
}
