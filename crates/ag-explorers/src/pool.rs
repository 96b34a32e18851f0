//! The ranked pool of best candidates across every pipeline shape.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;
use uuid::Uuid;

use ag_optimizer::{configuration_key, Configuration};
use ag_plugins::{Pipeline, PipelineShape};
use ag_types::Metric;

/// One full-fidelity evaluation that produced a usable score.
#[derive(Debug, Clone, Serialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    /// Global trial number, i.e. discovery order.
    pub trial_number: usize,
    pub shape: PipelineShape,
    pub config: Configuration,
    pub score: f64,
    pub std_err: f64,
    pub fold_scores: Vec<f64>,
    /// Configured pipeline; fitted on the full dataset once the search ends.
    #[serde(skip)]
    pub pipeline: Pipeline,
}

impl TrialResult {
    /// Identity used for deduplication.
    pub fn key(&self) -> String {
        format!("{}|{}", self.shape, configuration_key(&self.config))
    }
}

/// Deduplicated results, best first, at most `top_k` long.
///
/// Ordering: better score first (by the metric's direction), then lower
/// `std_err`, then earlier discovery.
#[derive(Debug, Clone)]
pub struct RankedPool {
    metric: Metric,
    top_k: usize,
    entries: Vec<TrialResult>,
    seen: BTreeSet<String>,
}

impl RankedPool {
    pub fn new(metric: Metric, top_k: usize) -> Self {
        Self {
            metric,
            top_k,
            entries: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    fn rank(&self, a: &TrialResult, b: &TrialResult) -> Ordering {
        let (oa, ob) = (self.metric.to_objective(a.score), self.metric.to_objective(b.score));
        ob.total_cmp(&oa)
            .then(a.std_err.total_cmp(&b.std_err))
            .then(a.trial_number.cmp(&b.trial_number))
    }

    /// Add a result. Returns whether it is in the pool afterwards; duplicates
    /// of a configuration already offered and non-finite scores are ignored.
    pub fn offer(&mut self, result: TrialResult) -> bool {
        if !result.score.is_finite() || !self.seen.insert(result.key()) {
            return false;
        }
        let id = result.trial_id;
        self.entries.push(result);
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by(|a, b| self.rank(a, b));
        entries.truncate(self.top_k);
        self.entries = entries;
        self.entries.iter().any(|e| e.trial_id == id)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn entries(&self) -> &[TrialResult] {
        &self.entries
    }

    pub fn best(&self) -> Option<&TrialResult> {
        self.entries.first()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.score).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<TrialResult> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_optimizer::ParameterValue;
    use ag_plugins::{PluginCategory, PluginRegistry, StageRef};

    fn result(number: usize, score: f64, std_err: f64, c: f64) -> TrialResult {
        let registry = PluginRegistry::with_defaults();
        let shape = PipelineShape::new(vec![], StageRef::new(PluginCategory::Classifiers, "perceptron")).unwrap();
        let mut config = Configuration::new();
        config.insert("perceptron.alpha".into(), ParameterValue::Float(c));
        let pipeline = shape.instantiate(&registry, &config).unwrap();
        TrialResult {
            trial_id: Uuid::new_v4(),
            trial_number: number,
            shape,
            config,
            score,
            std_err,
            fold_scores: vec![score],
            pipeline,
        }
    }

    #[test]
    fn keeps_best_k_in_order() {
        let mut pool = RankedPool::new(Metric::AucRoc, 2);
        assert!(pool.offer(result(0, 0.7, 0.0, 1e-4)));
        assert!(pool.offer(result(1, 0.9, 0.0, 2e-4)));
        assert!(pool.offer(result(2, 0.8, 0.0, 3e-4)));
        assert!(!pool.offer(result(3, 0.6, 0.0, 4e-4)));
        assert_eq!(pool.scores(), vec![0.9, 0.8]);
    }

    #[test]
    fn minimize_metrics_rank_lower_first() {
        let mut pool = RankedPool::new(Metric::Rmse, 3);
        pool.offer(result(0, 2.0, 0.0, 1e-4));
        pool.offer(result(1, 1.0, 0.0, 2e-4));
        pool.offer(result(2, f64::INFINITY, 0.0, 3e-4));
        assert_eq!(pool.scores(), vec![1.0, 2.0]);
    }

    #[test]
    fn ties_break_on_std_err_then_discovery() {
        let mut pool = RankedPool::new(Metric::AucRoc, 3);
        pool.offer(result(0, 0.8, 0.05, 1e-4));
        pool.offer(result(1, 0.8, 0.01, 2e-4));
        pool.offer(result(2, 0.8, 0.01, 3e-4));
        let order: Vec<usize> = pool.entries().iter().map(|e| e.trial_number).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn duplicate_configurations_are_ignored() {
        let mut pool = RankedPool::new(Metric::AucRoc, 3);
        assert!(pool.offer(result(0, 0.7, 0.0, 1e-4)));
        assert!(!pool.offer(result(1, 0.9, 0.0, 1e-4)));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.best().unwrap().trial_number, 0);
    }
}
