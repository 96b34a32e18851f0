//! Ensemble search: a convex combination of the best pipelines a [`Seeker`]
//! finds.

use std::sync::Arc;

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use ag_eval::{Evaluator, OutOfFold};
use ag_plugins::{weighted_average, Model, Pipeline, PluginRegistry, WeightedEnsemble};
use ag_types::{internal_error, validation_error, AgError, AgResult, Dataset, Metric, TaskFamily};

use crate::config::{StudyConfig, WeightSearch};
use crate::hooks::{CancellationHook, SearchEvent};
use crate::seeker::Seeker;

/// A pool member with its cached held-out predictions.
struct Member {
    pipeline: Pipeline,
    oof: OutOfFold,
}

/// Best weight vector found so far, with its score and objective.
#[derive(Debug, Clone)]
struct Incumbent {
    weights: Vec<f64>,
    score: f64,
    objective: f64,
}

/// Runs a [`Seeker`] for `ensemble_size` candidates, then searches convex
/// weights over them on cached out-of-fold predictions.
pub struct EnsembleSeeker {
    seeker: Seeker,
}

impl EnsembleSeeker {
    pub fn new(task: TaskFamily, config: StudyConfig, registry: PluginRegistry) -> AgResult<Self> {
        let pool_width = config.ensemble_size;
        let seeker = Seeker::new(task, config.with_top_k(pool_width), registry)?;
        Ok(Self { seeker })
    }

    pub fn classifier(config: StudyConfig) -> AgResult<Self> {
        Self::new(TaskFamily::Classification, config, PluginRegistry::with_defaults())
    }

    pub fn regression(config: StudyConfig) -> AgResult<Self> {
        Self::new(TaskFamily::Regression, config, PluginRegistry::with_defaults())
    }

    pub fn survival(config: StudyConfig) -> AgResult<Self> {
        Self::new(TaskFamily::Survival, config, PluginRegistry::with_defaults())
    }

    pub fn with_hooks(mut self, hook: Arc<dyn CancellationHook>) -> Self {
        self.seeker = self.seeker.with_hooks(hook);
        self
    }

    /// The inner seeker, e.g. for [`Seeker::status`].
    pub fn seeker(&self) -> &Seeker {
        &self.seeker
    }

    fn config(&self) -> &StudyConfig {
        self.seeker.config()
    }

    fn metric(&self) -> Metric {
        self.seeker.metric()
    }

    fn check_stop(&self) -> AgResult<()> {
        if self.seeker.should_stop() {
            self.seeker.status_handle().write().mark_cancelled();
            warn!("Ensemble search '{}' cancelled by hook", self.config().study_name);
            return Err(AgError::Cancelled {
                study: self.config().study_name.clone(),
            });
        }
        Ok(())
    }

    /// Search pipelines, then weights, and return the fitted ensemble.
    pub fn search(&self, data: &Dataset) -> AgResult<WeightedEnsemble> {
        let report = self.seeker.search_report(data)?;
        self.check_stop()?;

        let evaluator = self.seeker.evaluator(data)?;
        let stop = || self.seeker.should_stop();
        let mut members = Vec::with_capacity(report.pool.len());
        for entry in report.pool {
            self.check_stop()?;
            match evaluator.out_of_fold(&entry.pipeline, data, &stop) {
                Ok(oof) => members.push(Member {
                    pipeline: entry.pipeline,
                    oof,
                }),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) if self.config().strict => return Err(e),
                Err(e) => warn!("Leaving {} out of the ensemble: {}", entry.shape, e),
            }
        }
        if members.is_empty() {
            return Err(validation_error!("no pool member produced out-of-fold predictions"));
        }

        let best = self.search_weights(&evaluator, data, &members)?;
        info!(
            "Ensemble '{}' of {} members scores {} = {:.4}, weights {:?}",
            self.config().study_name,
            members.len(),
            self.metric(),
            best.score,
            best.weights
        );

        let chosen: Vec<(Pipeline, f64)> = members
            .into_iter()
            .zip(best.weights)
            .filter(|(_, w)| *w > 0.0)
            .map(|(m, w)| (m.pipeline, w))
            .collect();
        let ensemble = WeightedEnsemble::new(self.seeker.task(), chosen)?;
        Ok(if self.seeker.task() == TaskFamily::Classification {
            ensemble.with_classes(data.classes())
        } else {
            ensemble
        })
    }

    /// Score a weight vector on the members' out-of-fold predictions.
    fn score(&self, evaluator: &Evaluator, data: &Dataset, members: &[Member], weights: &[f64]) -> AgResult<Incumbent> {
        let predictions: Vec<Array2<f64>> = members.iter().map(|m| m.oof.predictions.clone()).collect();
        let combined = weighted_average(&predictions, weights)?;
        let score = evaluator.score_out_of_fold(data, &members[0].oof.rows, &combined)?;
        Ok(Incumbent {
            weights: weights.to_vec(),
            score,
            objective: self.metric().to_objective(score),
        })
    }

    fn search_weights(&self, evaluator: &Evaluator, data: &Dataset, members: &[Member]) -> AgResult<Incumbent> {
        let n = members.len();
        let unit = |i: usize| -> Vec<f64> { (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect() };

        // Start from the best single member.
        let mut best: Option<Incumbent> = None;
        for i in 0..n {
            let candidate = self.score(evaluator, data, members, &unit(i))?;
            debug!(member = %members[i].pipeline.name(), score = candidate.score, "single member score");
            if best.as_ref().map_or(true, |b| candidate.objective > b.objective) {
                best = Some(candidate);
            }
        }
        let mut best = best.ok_or_else(|| internal_error!("empty ensemble pool"))?;
        if n == 1 {
            return Ok(best);
        }

        match self.config().ensemble_strategy {
            WeightSearch::Greedy => self.greedy(evaluator, data, members, best),
            WeightSearch::Random => {
                let mut rng = ChaCha8Rng::seed_from_u64(self.config().random_state);
                for iteration in 0..self.config().num_ensemble_iter {
                    self.check_stop()?;
                    // Normalized exponentials are Dirichlet(1, ..., 1).
                    let weights: Vec<f64> = (0..n).map(|_| -rng.gen_range(f64::EPSILON..1.0).ln()).collect();
                    let total: f64 = weights.iter().sum();
                    let weights: Vec<f64> = weights.into_iter().map(|w| w / total).collect();
                    let candidate = self.score(evaluator, data, members, &weights)?;
                    let accepted = candidate.objective > best.objective;
                    self.report_proposal(iteration, candidate.score, accepted);
                    if accepted {
                        best = candidate;
                    }
                }
                Ok(best)
            }
        }
    }

    /// Forward selection with replacement: each step adds one more unit of
    /// weight to whichever member improves the score most, and stops when no
    /// addition helps.
    fn greedy(&self, evaluator: &Evaluator, data: &Dataset, members: &[Member], start: Incumbent) -> AgResult<Incumbent> {
        let n = members.len();
        let mut counts: Vec<f64> = start.weights.clone();
        let mut best = start;
        for iteration in 0..self.config().num_ensemble_iter {
            self.check_stop()?;
            let mut step: Option<(usize, Incumbent)> = None;
            for i in 0..n {
                let mut trial_counts = counts.clone();
                trial_counts[i] += 1.0;
                let total: f64 = trial_counts.iter().sum();
                let weights: Vec<f64> = trial_counts.iter().map(|c| c / total).collect();
                let candidate = self.score(evaluator, data, members, &weights)?;
                if step.as_ref().map_or(true, |(_, s)| candidate.objective > s.objective) {
                    step = Some((i, candidate));
                }
            }
            let Some((added, candidate)) = step else {
                break;
            };
            let accepted = candidate.objective > best.objective;
            self.report_proposal(iteration, candidate.score, accepted);
            if !accepted {
                break;
            }
            counts[added] += 1.0;
            best = candidate;
        }
        Ok(best)
    }

    fn report_proposal(&self, iteration: usize, score: f64, accepted: bool) {
        debug!(iteration, score, accepted, "ensemble weight proposal");
        self.seeker.emit(SearchEvent::EnsembleProposal {
            study: self.config().study_name.clone(),
            iteration,
            score,
            accepted,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookSignal;
    use ndarray::Array1;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noisy_line(n: usize) -> Dataset {
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / n as f64);
        let y: Array1<f64> = x.column(0).mapv(|v| 4.0 * v + (v * 37.0).sin() * 0.3);
        Dataset::new(x, y).unwrap()
    }

    fn config() -> StudyConfig {
        StudyConfig::new("ensemble_test")
            .with_cv(3)
            .with_num_iter(2)
            .with_ensemble(3, 5)
    }

    /// Lets the pipeline search through, then stops.
    struct StopAfterPolls {
        remaining: AtomicUsize,
    }

    impl CancellationHook for StopAfterPolls {
        fn poll(&self) -> HookSignal {
            match self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            {
                Ok(_) => HookSignal::Continue,
                Err(_) => HookSignal::Stop,
            }
        }
    }

    #[test]
    fn greedy_ensemble_is_no_worse_than_its_best_member() {
        let data = noisy_line(60);
        let seeker = EnsembleSeeker::regression(config()).unwrap();
        let evaluator = seeker.seeker().evaluator(&data).unwrap();
        let rows = evaluator.plan().held_out_rows();
        let never = || false;
        let held_out_score = |pipelines: &[Pipeline], weights: &[f64]| -> f64 {
            let predictions: Vec<Array2<f64>> = pipelines
                .iter()
                .map(|p| evaluator.out_of_fold(p, &data, &never).unwrap().predictions)
                .collect();
            let combined = weighted_average(&predictions, weights).unwrap();
            evaluator.score_out_of_fold(&data, &rows, &combined).unwrap()
        };

        let report = seeker.seeker().search_report(&data).unwrap();
        let best_single = report
            .pool
            .iter()
            .map(|r| held_out_score(&[r.pipeline.clone()], &[1.0]))
            .fold(f64::INFINITY, f64::min);

        let ensemble = seeker.search(&data).unwrap();
        let weights = ensemble.weights();
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(weights.iter().all(|w| *w > 0.0));

        let members: Vec<Pipeline> = ensemble.members().iter().map(|(p, _)| p.clone()).collect();
        let score = held_out_score(&members, &weights);
        assert!(score <= best_single + 1e-9, "ensemble {score} vs best member {best_single}");
    }

    #[test]
    fn random_strategy_produces_a_convex_combination() {
        let data = noisy_line(45);
        let seeker = EnsembleSeeker::regression(config().with_ensemble_strategy(WeightSearch::Random)).unwrap();
        let ensemble = seeker.search(&data).unwrap();
        assert!((ensemble.weights().iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let predictions = ensemble.predict(&data.features).unwrap();
        assert_eq!(predictions.len(), 45);
    }

    #[test]
    fn cancellation_during_weight_search_is_surfaced() {
        let data = noisy_line(30);
        let seeker = EnsembleSeeker::regression(config()).unwrap();
        // Count the polls a full pipeline search makes, then allow exactly that many.
        let counter = Arc::new(StopAfterPolls {
            remaining: AtomicUsize::new(usize::MAX),
        });
        let probe = EnsembleSeeker::regression(config()).unwrap().with_hooks(counter.clone());
        probe.seeker().search_report(&data).unwrap();
        let used = usize::MAX - counter.remaining.load(Ordering::SeqCst);

        let seeker = seeker.with_hooks(Arc::new(StopAfterPolls {
            remaining: AtomicUsize::new(used),
        }));
        let err = seeker.search(&data).unwrap_err();
        assert!(err.is_cancelled());
    }
}
