// Rhythm rules for a single voice.
//
// A voice's rhythm is its list of note durations. It is valid when:
// - every duration is one of the voice's allowed durations,
// - the durations sum to the piece length,
// - if rhythmic patterns are configured, the notes of every measure follow
//   one of them (a pattern is one way to divide a measure; its last value may
//   spill over the bar line, and the spilled remainder then opens the next
//   measure),
// - if the line must end with a whole measure, the last note fills it.
//
// The same check guards the initial draft (draft.rs) and every
// rhythm-changing move (neighborhood.rs), so a search can never leave the
// space of valid rhythms.

use crate::piece::Tick;
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use std::collections::{BTreeMap, BTreeSet};

/// How many times random line generation restarts before giving up.
const GENERATION_ATTEMPTS: usize = 200;

/// Rhythm constraints of one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct RhythmRules {
    /// Sorted, deduplicated allowed note durations.
    pub allowed_durations: Vec<Tick>,
    /// Valid divisions of one measure; empty means any division.
    pub patterns: Vec<Vec<Tick>>,
    pub ticks_per_measure: Tick,
    pub end_with_whole_measure: bool,
}

impl RhythmRules {
    pub fn new(
        mut allowed_durations: Vec<Tick>,
        patterns: Vec<Vec<Tick>>,
        ticks_per_measure: Tick,
        end_with_whole_measure: bool,
    ) -> Self {
        allowed_durations.retain(|&d| d > 0);
        allowed_durations.sort_unstable();
        allowed_durations.dedup();
        RhythmRules {
            allowed_durations,
            patterns,
            ticks_per_measure,
            end_with_whole_measure,
        }
    }

    /// Eighth, quarter, half and whole notes that fit in a measure, plus a
    /// note filling the whole measure.
    pub fn default_durations(ticks_per_measure: Tick) -> Vec<Tick> {
        let mut durations: Vec<Tick> = [1, 2, 4, 8]
            .into_iter()
            .filter(|&d| d <= ticks_per_measure)
            .collect();
        durations.push(ticks_per_measure);
        durations.sort_unstable();
        durations.dedup();
        durations
    }

    pub fn is_allowed(&self, duration: Tick) -> bool {
        self.allowed_durations.binary_search(&duration).is_ok()
    }

    fn matches_pattern(&self, measure_durations: &[Tick]) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|pattern| pattern.starts_with(measure_durations))
    }

    /// Durations of the current measure after appending `next`. A note that
    /// crosses the bar line leaves its remainder as the next measure's start.
    fn advance_measure(&self, current: &mut Vec<Tick>, next: Tick) {
        let extended: Tick = current.iter().sum::<Tick>() + next;
        if extended < self.ticks_per_measure {
            current.push(next);
            return;
        }
        let remainder = (extended - self.ticks_per_measure) % self.ticks_per_measure;
        current.clear();
        if remainder > 0 {
            current.push(remainder);
        }
    }

    /// Check a full line of durations, describing the first problem found.
    pub fn check_line(&self, durations: &[Tick], total: Tick) -> Result<(), String> {
        let mut current: Vec<Tick> = Vec::new();
        let mut elapsed: Tick = 0;
        for &duration in durations {
            if !self.is_allowed(duration) {
                return Err(format!("duration {} is not allowed", duration));
            }
            let mut extended = current.clone();
            extended.push(duration);
            if !self.matches_pattern(&extended) {
                return Err(format!("disallowed rhythmic pattern {:?}", extended));
            }
            elapsed += duration;
            self.advance_measure(&mut current, duration);
        }
        if elapsed != total {
            return Err(format!("line lasts {} ticks, {} needed", elapsed, total));
        }
        if self.end_with_whole_measure {
            match durations.last() {
                Some(&last) if last == self.ticks_per_measure => {}
                _ => return Err("line must end with a note filling the last measure".to_string()),
            }
        }
        Ok(())
    }

    pub fn accepts(&self, durations: &[Tick], total: Tick) -> bool {
        self.check_line(durations, total).is_ok()
    }

    /// Whether a line standing at `elapsed` ticks, with `current` holding the
    /// open measure's durations, can still be completed to `body` ticks (and
    /// closed by the final whole measure when that is required). Failing
    /// states are remembered in `dead`.
    fn can_complete(
        &self,
        elapsed: Tick,
        current: &[Tick],
        body: Tick,
        dead: &mut BTreeSet<(Tick, Vec<Tick>)>,
    ) -> bool {
        // Without patterns the open measure never matters.
        let current = if self.patterns.is_empty() { &[][..] } else { current };
        if elapsed == body {
            return !self.end_with_whole_measure
                || self.matches_pattern(&[current, &[self.ticks_per_measure][..]].concat());
        }
        let key = (elapsed, current.to_vec());
        if dead.contains(&key) {
            return false;
        }
        for &duration in &self.allowed_durations {
            if elapsed + duration > body {
                break;
            }
            if let Some(next) = self.extend_measure(current, duration) {
                if self.can_complete(elapsed + duration, &next, body, dead) {
                    return true;
                }
            }
        }
        dead.insert(key);
        false
    }

    /// The open measure after appending `duration`, or None when the
    /// durations so far follow no pattern.
    fn extend_measure(&self, current: &[Tick], duration: Tick) -> Option<Vec<Tick>> {
        let mut extended = current.to_vec();
        extended.push(duration);
        if !self.matches_pattern(&extended) {
            return None;
        }
        extended.pop();
        self.advance_measure(&mut extended, duration);
        Some(extended)
    }

    /// Whether any valid line of this length exists, patterns included.
    pub fn is_satisfiable(&self, total: Tick) -> bool {
        let Some(body) = self.body_length(total) else {
            return false;
        };
        if self.end_with_whole_measure && !self.is_allowed(self.ticks_per_measure) {
            return false;
        }
        self.can_complete(0, &[], body, &mut BTreeSet::new())
    }

    fn body_length(&self, total: Tick) -> Option<Tick> {
        if self.end_with_whole_measure {
            total.checked_sub(self.ticks_per_measure)
        } else {
            Some(total)
        }
    }

    /// Generate a random valid line. Each step picks among the durations that
    /// keep the line completable, weighted by `duration_weights` (missing
    /// entries weigh 1). Returns None if no valid line was found.
    pub fn generate_line(
        &self,
        total: Tick,
        duration_weights: &BTreeMap<Tick, f64>,
        rng: &mut impl Rng,
    ) -> Option<Vec<Tick>> {
        if !self.is_satisfiable(total) {
            return None;
        }
        let body = self.body_length(total)?;
        let mut dead = BTreeSet::new();

        for _ in 0..GENERATION_ATTEMPTS {
            let mut line = Vec::new();
            let mut current: Vec<Tick> = Vec::new();
            let mut elapsed: Tick = 0;
            let mut stuck = false;

            while elapsed < body {
                let mut candidates: Vec<(Tick, f64, Vec<Tick>)> = Vec::new();
                for &d in &self.allowed_durations {
                    let weight = duration_weights.get(&d).copied().unwrap_or(1.0);
                    if elapsed + d > body || !(weight > 0.0 && weight.is_finite()) {
                        continue;
                    }
                    if let Some(next) = self.extend_measure(&current, d) {
                        if self.can_complete(elapsed + d, &next, body, &mut dead) {
                            candidates.push((d, weight, next));
                        }
                    }
                }
                let Ok(dist) = WeightedIndex::new(candidates.iter().map(|c| c.1)) else {
                    stuck = true;
                    break;
                };
                let (duration, _, next) = candidates.swap_remove(dist.sample(rng));
                line.push(duration);
                elapsed += duration;
                current = next;
            }

            if stuck {
                continue;
            }
            if self.end_with_whole_measure {
                line.push(self.ticks_per_measure);
            }
            if self.accepts(&line, total) {
                return Some(line);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn common_patterns() -> Vec<Vec<Tick>> {
        vec![
            vec![8],
            vec![4, 4],
            vec![4, 2, 2],
            vec![2, 2, 4],
            vec![2, 2, 2, 2],
            vec![6, 2],
            vec![4, 8],
            vec![4],
        ]
    }

    #[test]
    fn test_default_durations() {
        assert_eq!(RhythmRules::default_durations(8), vec![1, 2, 4, 8]);
        assert_eq!(RhythmRules::default_durations(6), vec![1, 2, 4, 6]);
    }

    #[test]
    fn test_check_line_without_patterns() {
        let rules = RhythmRules::new(vec![2, 4, 8], vec![], 8, false);
        assert!(rules.accepts(&[4, 2, 2, 8], 16));
        assert!(rules.check_line(&[4, 2, 2], 16).is_err(), "too short");
        assert!(rules.check_line(&[3, 5, 8], 16).is_err(), "3 is not allowed");
    }

    #[test]
    fn test_check_line_with_patterns_and_tie() {
        let rules = RhythmRules::new(vec![2, 4, 6, 8], common_patterns(), 8, true);
        // Half note, whole note tied over the bar, half note, final whole.
        assert!(rules.accepts(&[4, 8, 4, 8], 24));
        // [2, 4] opens no pattern.
        let err = rules.check_line(&[2, 4, 2, 8], 16).unwrap_err();
        assert!(err.contains("pattern"), "got {}", err);
        // Must end with a whole measure.
        assert!(rules.check_line(&[8, 4, 4], 16).is_err());
    }

    #[test]
    fn test_unsatisfiable_length() {
        let rules = RhythmRules::new(vec![4], vec![], 8, false);
        assert!(!rules.is_satisfiable(6));
        assert!(rules.is_satisfiable(16));
        let rules = RhythmRules::new(vec![2, 4], vec![], 8, true);
        assert!(!rules.is_satisfiable(16), "whole note needed but not allowed");
    }

    #[test]
    fn test_satisfiability_follows_patterns() {
        // Every pattern ends with a half note; the final whole note never fits.
        let rules = RhythmRules::new(vec![2, 4, 8], vec![vec![4, 4]], 8, true);
        assert!(!rules.is_satisfiable(16));
        // The only pattern needs a dotted half, which is not allowed.
        let rules = RhythmRules::new(vec![2, 4, 8], vec![vec![2, 6]], 8, false);
        assert!(!rules.is_satisfiable(16));
        assert!(rules.generate_line(16, &BTreeMap::new(), &mut StdRng::seed_from_u64(0)).is_none());
        let rules = RhythmRules::new(vec![2, 4, 8], vec![vec![2, 2, 4], vec![8]], 8, true);
        assert!(rules.is_satisfiable(24));
    }

    #[test]
    fn test_generation_never_strands_in_a_tie() {
        // A tied whole note forces the next measure to open with a half note.
        let rules = RhythmRules::new(vec![4, 8], vec![vec![4, 8], vec![4, 4], vec![8]], 8, true);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..30 {
            let line = rules.generate_line(32, &BTreeMap::new(), &mut rng).unwrap();
            assert!(rules.accepts(&line, 32), "invalid line {:?}", line);
        }
    }

    #[test]
    fn test_generated_lines_are_valid() {
        let rules = RhythmRules::new(vec![2, 4, 6, 8], common_patterns(), 8, true);
        let mut weights = BTreeMap::new();
        weights.insert(2, 0.3);
        weights.insert(4, 1.0);
        weights.insert(8, 0.5);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let line = rules.generate_line(32, &weights, &mut rng).expect("line");
            assert!(rules.accepts(&line, 32), "invalid line {:?}", line);
            assert_eq!(*line.last().unwrap(), 8);
        }
    }

    #[test]
    fn test_generation_respects_zero_weight() {
        let rules = RhythmRules::new(vec![2, 4], vec![], 8, false);
        let mut weights = BTreeMap::new();
        weights.insert(2, 0.0);
        let mut rng = StdRng::seed_from_u64(3);
        let line = rules.generate_line(16, &weights, &mut rng).unwrap();
        assert_eq!(line, vec![4, 4, 4, 4]);
    }
}
