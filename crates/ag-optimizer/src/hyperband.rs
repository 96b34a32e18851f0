//! Hyperband: successive halving over several brackets of starting budget.
//!
//! The budget handed out with each [`Suggestion`] is the fraction of the
//! training fold the configuration is fitted on. With `eta = 3` and
//! `s_max = 2` the brackets are:
//!
//! | bracket | rung budgets      | configurations per rung |
//! |---------|-------------------|-------------------------|
//! | s = 2   | 1/9, 1/3, 1       | 9, 3, 1                 |
//! | s = 1   | 1/3, 1            | 5, 1                    |
//! | s = 0   | 1                 | 3                       |
//!
//! Brackets run most-aggressive first and cycle, sampling fresh
//! configurations each time, so the strategy never runs dry.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use tracing::debug;

use crate::search::{best_observation, Configuration, Optimizer, SearchSpace, Suggestion};

pub struct HyperbandSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    eta: usize,
    s_max: usize,
    /// Bracket currently being run.
    bracket: usize,
    /// Rung index inside the current bracket.
    rung: usize,
    queue: VecDeque<Suggestion>,
    /// Objectives observed for the current rung.
    rung_results: Vec<(Configuration, f64)>,
    full_budget: Vec<(Configuration, f64)>,
    partial_budget: Vec<(Configuration, f64)>,
    started: bool,
}

impl HyperbandSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
            eta: 3,
            s_max: 2,
            bracket: 2,
            rung: 0,
            queue: VecDeque::new(),
            rung_results: Vec::new(),
            full_budget: Vec::new(),
            partial_budget: Vec::new(),
            started: false,
        }
    }

    /// Smallest fraction of the training data any rung uses.
    pub fn min_budget(&self) -> f64 {
        self.budget_for(self.s_max, 0)
    }

    fn budget_for(&self, bracket: usize, rung: usize) -> f64 {
        let exponent = bracket as i32 - rung as i32;
        (self.eta as f64).powi(-exponent)
    }

    fn bracket_size(&self, bracket: usize) -> usize {
        let ratio = (self.s_max + 1) as f64 / (bracket + 1) as f64;
        (ratio * (self.eta as f64).powi(bracket as i32)).ceil() as usize
    }

    fn start_bracket(&mut self, bracket: usize) {
        self.bracket = bracket;
        self.rung = 0;
        self.rung_results.clear();
        let budget = self.budget_for(bracket, 0);
        let n = self.bracket_size(bracket);
        debug!(bracket, configurations = n, budget, "starting hyperband bracket");
        for _ in 0..n {
            let config = self.space.sample(&mut self.rng);
            self.queue.push_back(Suggestion { config, budget });
        }
    }

    /// Promote the best of the finished rung, or move on to the next bracket.
    fn advance(&mut self) {
        let finished_last_rung = self.rung >= self.bracket;
        if finished_last_rung || self.rung_results.is_empty() {
            let next = if self.bracket == 0 { self.s_max } else { self.bracket - 1 };
            self.start_bracket(next);
            return;
        }

        let keep = (self.rung_results.len() / self.eta).max(1);
        let mut ranked = std::mem::take(&mut self.rung_results);
        // Failed trials (non-finite objectives) sort last.
        ranked.sort_by(|a, b| {
            let a = if a.1.is_finite() { a.1 } else { f64::NEG_INFINITY };
            let b = if b.1.is_finite() { b.1 } else { f64::NEG_INFINITY };
            b.total_cmp(&a)
        });
        self.rung += 1;
        let budget = self.budget_for(self.bracket, self.rung);
        debug!(
            bracket = self.bracket,
            rung = self.rung,
            promoted = keep,
            budget,
            "promoting hyperband rung"
        );
        for (config, _) in ranked.into_iter().take(keep) {
            self.queue.push_back(Suggestion { config, budget });
        }
    }
}

impl Optimizer for HyperbandSearch {
    fn suggest(&mut self) -> Option<Suggestion> {
        if !self.started {
            self.started = true;
            self.start_bracket(self.s_max);
        }
        if self.queue.is_empty() {
            self.advance();
        }
        self.queue.pop_front()
    }

    fn observe(&mut self, suggestion: &Suggestion, objective: f64) {
        let current_budget = self.budget_for(self.bracket, self.rung);
        if (suggestion.budget - current_budget).abs() < 1e-12 {
            self.rung_results.push((suggestion.config.clone(), objective));
        }
        if suggestion.is_full_budget() {
            self.full_budget.push((suggestion.config.clone(), objective));
        } else {
            self.partial_budget.push((suggestion.config.clone(), objective));
        }
    }

    fn incumbent(&self) -> Option<Configuration> {
        best_observation(&self.full_budget)
            .or_else(|| best_observation(&self.partial_budget))
            .map(|(c, _)| c.clone())
    }

    fn name(&self) -> &str {
        "hyperband"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new().add_float("x", 0.0, 1.0)
    }

    fn run(hb: &mut HyperbandSearch, steps: usize) -> Vec<Suggestion> {
        let mut seen = Vec::new();
        for _ in 0..steps {
            let s = hb.suggest().unwrap();
            let x = s.config["x"].as_f64().unwrap();
            hb.observe(&s, x * s.budget);
            seen.push(s);
        }
        seen
    }

    #[test]
    fn first_bracket_follows_schedule() {
        let mut hb = HyperbandSearch::new(space(), 1);
        let seen = run(&mut hb, 13);
        let budgets: Vec<f64> = seen.iter().map(|s| s.budget).collect();
        assert!(budgets[..9].iter().all(|b| (b - 1.0 / 9.0).abs() < 1e-12));
        assert!(budgets[9..12].iter().all(|b| (b - 1.0 / 3.0).abs() < 1e-12));
        assert_eq!(budgets[12], 1.0);
    }

    #[test]
    fn promotes_best_of_each_rung() {
        let mut hb = HyperbandSearch::new(space(), 2);
        let seen = run(&mut hb, 12);
        let mut first_rung: Vec<f64> = seen[..9].iter().map(|s| s.config["x"].as_f64().unwrap()).collect();
        first_rung.sort_by(|a, b| b.total_cmp(a));
        let promoted: Vec<f64> = seen[9..12].iter().map(|s| s.config["x"].as_f64().unwrap()).collect();
        assert_eq!(promoted, first_rung[..3].to_vec());
    }

    #[test]
    fn brackets_cycle_forever() {
        let mut hb = HyperbandSearch::new(space(), 3);
        // 13 + 6 + 3 suggestions cover one full cycle
        let seen = run(&mut hb, 40);
        assert_eq!(seen.len(), 40);
        assert!((seen[22].budget - 1.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn incumbent_prefers_full_budget_results() {
        let mut hb = HyperbandSearch::new(space(), 4);
        run(&mut hb, 9);
        assert!(hb.incumbent().is_some());
        run(&mut hb, 4);
        let full: Vec<_> = hb.full_budget.iter().map(|(c, _)| c.clone()).collect();
        assert_eq!(hb.incumbent(), full.first().cloned());
    }

    #[test]
    fn tolerates_unobserved_suggestions() {
        let mut hb = HyperbandSearch::new(space(), 5);
        for _ in 0..9 {
            // Suggested but never observed
            hb.suggest().unwrap();
        }
        // Empty rung restarts with the next bracket instead of stalling
        let next = hb.suggest().unwrap();
        assert!((next.budget - 1.0 / 3.0).abs() < 1e-12);
        assert!(hb.incumbent().is_none());
    }

    #[test]
    fn minimum_budget_is_one_ninth() {
        let hb = HyperbandSearch::new(space(), 0);
        assert!((hb.min_budget() - 1.0 / 9.0).abs() < 1e-12);
    }
}
