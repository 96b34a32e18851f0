//! Cross-validated scoring of pipelines.

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ag_plugins::{Model, Pipeline};
use ag_types::{internal_error, validation_error, AgError, AgResult, Dataset, Metric, TaskFamily};

use crate::folds::{Fold, FoldPlan};
use crate::metrics::{
    evaluate_auc, evaluate_brier_score, evaluate_c_index, generate_score, mae, print_score, r2,
    rmse,
};

/// Cross-validated score of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Mean metric value over folds.
    pub mean: f64,
    /// Half-width of the 95% interval around `mean`.
    pub std_err: f64,
    pub fold_scores: Vec<f64>,
}

impl Score {
    pub fn from_folds(fold_scores: Vec<f64>) -> Self {
        let (mean, std_err) = generate_score(&fold_scores);
        Self {
            mean,
            std_err,
            fold_scores,
        }
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&print_score((self.mean, self.std_err)))
    }
}

/// Held-out predictions for every row some fold tests on.
///
/// `predictions` has one row per entry of `rows`: class probabilities for
/// classification, a single column of values or risks otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct OutOfFold {
    pub rows: Vec<usize>,
    pub predictions: Array2<f64>,
}

/// Median of the observed event times, or of all times when nothing happened.
pub fn default_horizon(times: &Array1<f64>, events: &Array1<f64>) -> f64 {
    let mut observed: Vec<f64> = times
        .iter()
        .zip(events.iter())
        .filter(|(_, e)| **e == 1.0)
        .map(|(t, _)| *t)
        .collect();
    if observed.is_empty() {
        observed = times.to_vec();
    }
    if observed.is_empty() {
        return 0.0;
    }
    observed.sort_by(|a, b| a.total_cmp(b));
    let mid = observed.len() / 2;
    if observed.len() % 2 == 0 {
        (observed[mid - 1] + observed[mid]) / 2.0
    } else {
        observed[mid]
    }
}

/// Scores pipelines on a fixed [`FoldPlan`] with one metric.
#[derive(Debug, Clone)]
pub struct Evaluator {
    task: TaskFamily,
    metric: Metric,
    plan: FoldPlan,
    /// Sorted labels of the whole dataset, for classification.
    classes: Vec<f64>,
    /// Survival evaluation time.
    horizon: f64,
    seed: u64,
    study_name: String,
}

impl Evaluator {
    /// Validate `data` for `task`, plan the folds and fix the survival horizon.
    pub fn new(task: TaskFamily, metric: Metric, data: &Dataset, cv: usize, seed: u64) -> AgResult<Self> {
        if !task.supports(metric) {
            return Err(AgError::Config(format!(
                "metric {metric} is not available for {task} tasks"
            )));
        }
        data.validate_for(task)?;
        let plan = FoldPlan::for_dataset(data, task, cv, seed)?;
        let classes = if task == TaskFamily::Classification {
            data.classes()
        } else {
            Vec::new()
        };
        let horizon = match &data.time_to_event {
            Some(times) => default_horizon(times, &data.target),
            None => 0.0,
        };
        Ok(Self {
            task,
            metric,
            plan,
            classes,
            horizon,
            seed,
            study_name: String::new(),
        })
    }

    pub fn with_horizon(mut self, horizon: f64) -> Self {
        self.horizon = horizon;
        self
    }

    /// Name carried by the cancellation error.
    pub fn with_study_name(mut self, name: impl Into<String>) -> Self {
        self.study_name = name.into();
        self
    }

    pub fn task(&self) -> TaskFamily {
        self.task
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn plan(&self) -> &FoldPlan {
        &self.plan
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    fn cancelled(&self) -> AgError {
        AgError::Cancelled {
            study: self.study_name.clone(),
        }
    }

    /// Rows of the training fold used at fidelity `budget`.
    ///
    /// Classification keeps at least one row of every class present so the
    /// estimator still sees every label.
    fn subsample(&self, data: &Dataset, train: &[usize], budget: f64, fold_index: usize) -> Vec<usize> {
        if budget >= 1.0 {
            return train.to_vec();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(
            self.seed ^ (fold_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let take = |rows: &mut Vec<usize>, rng: &mut ChaCha8Rng| -> Vec<usize> {
            rows.shuffle(rng);
            let n = ((rows.len() as f64 * budget).ceil() as usize).clamp(1, rows.len());
            rows[..n].to_vec()
        };

        let mut picked = if self.task == TaskFamily::Classification {
            let mut picked = Vec::new();
            for class in &self.classes {
                let mut rows: Vec<usize> = train
                    .iter()
                    .copied()
                    .filter(|i| data.target[*i] == *class)
                    .collect();
                if !rows.is_empty() {
                    picked.extend(take(&mut rows, &mut rng));
                }
            }
            picked
        } else {
            let mut rows = train.to_vec();
            take(&mut rows, &mut rng)
        };
        picked.sort_unstable();
        picked
    }

    /// Fit a copy of `pipeline` on one fold's training rows.
    fn fit_fold(
        &self,
        pipeline: &Pipeline,
        data: &Dataset,
        fold: &Fold,
        budget: f64,
        fold_index: usize,
    ) -> AgResult<Pipeline> {
        let rows = self.subsample(data, &fold.train, budget, fold_index);
        let mut model = pipeline.clone();
        model.fit(&data.select(&rows))?;
        Ok(model)
    }

    /// Predictions in the shape [`Evaluator::score_predictions`] expects.
    fn predict(&self, model: &dyn Model, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        match self.task {
            TaskFamily::Classification => model.predict_proba(x),
            TaskFamily::Regression => Ok(model.predict(x)?.insert_axis(Axis(1))),
            TaskFamily::Survival => Ok(model.predict_risk(x, self.horizon)?.insert_axis(Axis(1))),
        }
    }

    /// Score predictions for the `test` rows, with `train` rows supplying the
    /// censoring distribution for survival metrics.
    pub fn score_predictions(
        &self,
        data: &Dataset,
        train: &[usize],
        test: &[usize],
        predictions: &Array2<f64>,
    ) -> AgResult<f64> {
        let y_test = data.target.select(Axis(0), test);
        match self.task {
            TaskFamily::Classification => {
                let (aucroc, aucprc) = evaluate_auc(&y_test, predictions, Some(&self.classes))?;
                Ok(if self.metric == Metric::AucPrc { aucprc } else { aucroc })
            }
            TaskFamily::Regression => {
                let y_pred = predictions.column(0).to_owned();
                match self.metric {
                    Metric::Mae => mae(&y_test, &y_pred),
                    Metric::R2 => r2(&y_test, &y_pred),
                    _ => rmse(&y_test, &y_pred),
                }
            }
            TaskFamily::Survival => {
                let times = data
                    .time_to_event
                    .as_ref()
                    .ok_or_else(|| validation_error!("survival tasks require time_to_event"))?;
                let risk = predictions.column(0).to_owned();
                let train_times = times.select(Axis(0), train);
                let train_events = data.target.select(Axis(0), train);
                let test_times = times.select(Axis(0), test);
                let scorer = if self.metric == Metric::BrierScore {
                    evaluate_brier_score
                } else {
                    evaluate_c_index
                };
                scorer(&train_times, &train_events, &risk, &test_times, &y_test, self.horizon)
            }
        }
    }

    /// Cross-validated score of `pipeline` at fidelity `budget`.
    ///
    /// Folds run in parallel. `should_stop` is checked before each fold
    /// starts; once it returns true the evaluation ends with
    /// [`AgError::Cancelled`].
    pub fn evaluate(
        &self,
        pipeline: &Pipeline,
        data: &Dataset,
        budget: f64,
        should_stop: &(dyn Fn() -> bool + Sync),
    ) -> AgResult<Score> {
        if !(budget > 0.0 && budget <= 1.0) {
            return Err(internal_error!("budget {budget} outside (0, 1]"));
        }
        let fold_scores = self
            .plan
            .folds()
            .par_iter()
            .enumerate()
            .map(|(k, fold)| {
                if should_stop() {
                    return Err(self.cancelled());
                }
                let model = self.fit_fold(pipeline, data, fold, budget, k)?;
                let x_test = data.features.select(Axis(0), &fold.test);
                let predictions = self.predict(&model, &x_test)?;
                self.score_predictions(data, &fold.train, &fold.test, &predictions)
            })
            .collect::<AgResult<Vec<f64>>>()?;

        let score = Score::from_folds(fold_scores);
        debug!(
            pipeline = %pipeline.shape(),
            budget,
            metric = %self.metric,
            score = %score,
            "evaluated pipeline"
        );
        Ok(score)
    }

    /// Held-out predictions of `pipeline` on every fold, at full fidelity.
    pub fn out_of_fold(
        &self,
        pipeline: &Pipeline,
        data: &Dataset,
        should_stop: &(dyn Fn() -> bool + Sync),
    ) -> AgResult<OutOfFold> {
        let per_fold = self
            .plan
            .folds()
            .par_iter()
            .enumerate()
            .map(|(k, fold)| {
                if should_stop() {
                    return Err(self.cancelled());
                }
                let model = self.fit_fold(pipeline, data, fold, 1.0, k)?;
                let x_test = data.features.select(Axis(0), &fold.test);
                Ok((fold.test.clone(), self.predict(&model, &x_test)?))
            })
            .collect::<AgResult<Vec<_>>>()?;

        let rows = self.plan.held_out_rows();
        let width = per_fold.first().map(|(_, p)| p.ncols()).unwrap_or(1);
        let mut predictions = Array2::<f64>::zeros((rows.len(), width));
        for (test, fold_predictions) in per_fold {
            if fold_predictions.ncols() != width {
                return Err(AgError::Scoring(format!(
                    "fold predictions have {} columns, expected {width}",
                    fold_predictions.ncols()
                )));
            }
            for (row, values) in test.iter().zip(fold_predictions.rows()) {
                if let Ok(pos) = rows.binary_search(row) {
                    predictions.row_mut(pos).assign(&values);
                }
            }
        }
        Ok(OutOfFold { rows, predictions })
    }

    /// Score combined out-of-fold predictions over all held-out rows.
    ///
    /// The censoring distribution for survival metrics comes from the whole
    /// dataset.
    pub fn score_out_of_fold(&self, data: &Dataset, rows: &[usize], predictions: &Array2<f64>) -> AgResult<f64> {
        let all: Vec<usize> = (0..data.n_samples()).collect();
        self.score_predictions(data, &all, rows, predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_optimizer::Configuration;
    use ag_plugins::{PipelineShape, PluginCategory, PluginRegistry, StageRef};
    use ndarray::array;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn never() -> impl Fn() -> bool + Sync {
        || false
    }

    fn blobs(n: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let label = (i % 2) as f64;
            let centre = if label == 1.0 { 1.5 } else { -1.5 };
            x[[i, 0]] = centre + rng.gen_range(-0.5..0.5);
            x[[i, 1]] = rng.gen_range(-0.5..0.5);
            y[i] = label;
        }
        Dataset::new(x, y).unwrap()
    }

    fn pipeline(category: PluginCategory, name: &str) -> Pipeline {
        let registry = PluginRegistry::with_defaults();
        PipelineShape::new(
            vec![StageRef::new(PluginCategory::FeatureScaling, "scaler")],
            StageRef::new(category, name),
        )
        .unwrap()
        .instantiate(&registry, &Configuration::new())
        .unwrap()
    }

    #[test]
    fn separable_classes_score_near_one() {
        let data = blobs(60, 1);
        let evaluator = Evaluator::new(TaskFamily::Classification, Metric::AucRoc, &data, 3, 0).unwrap();
        let score = evaluator
            .evaluate(&pipeline(PluginCategory::Classifiers, "logistic_regression"), &data, 1.0, &never())
            .unwrap();
        assert_eq!(score.fold_scores.len(), 3);
        assert!(score.mean > 0.95, "score = {score}");
    }

    #[test]
    fn evaluation_is_deterministic_at_partial_budget() {
        let data = blobs(60, 2);
        let evaluator = Evaluator::new(TaskFamily::Classification, Metric::AucPrc, &data, 3, 5).unwrap();
        let model = pipeline(PluginCategory::Classifiers, "nearest_centroid");
        let a = evaluator.evaluate(&model, &data, 1.0 / 3.0, &never()).unwrap();
        let b = evaluator.evaluate(&model, &data, 1.0 / 3.0, &never()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn subsample_keeps_every_class() {
        let data = blobs(30, 3);
        let evaluator = Evaluator::new(TaskFamily::Classification, Metric::AucRoc, &data, 3, 0).unwrap();
        let fold = &evaluator.plan().folds()[0];
        let rows = evaluator.subsample(&data, &fold.train, 1.0 / 9.0, 0);
        assert!(rows.len() < fold.train.len());
        let labels: Vec<f64> = rows.iter().map(|i| data.target[*i]).collect();
        assert!(labels.contains(&0.0) && labels.contains(&1.0));
    }

    #[test]
    fn stop_signal_cancels_evaluation() {
        let data = blobs(30, 4);
        let evaluator = Evaluator::new(TaskFamily::Classification, Metric::AucRoc, &data, 3, 0)
            .unwrap()
            .with_study_name("stopped");
        let calls = AtomicUsize::new(0);
        let stop = || {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        };
        let err = evaluator
            .evaluate(&pipeline(PluginCategory::Classifiers, "perceptron"), &data, 1.0, &stop)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("stopped"));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn unsupported_metric_is_config_error() {
        let data = blobs(10, 5);
        let err = Evaluator::new(TaskFamily::Classification, Metric::Rmse, &data, 2, 0).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn regression_metrics_are_dispatched() {
        let x = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| 3.0 * v - 2.0);
        let data = Dataset::new(x, y).unwrap();
        let model = pipeline(PluginCategory::Regression, "linear_regression");
        let rmse = Evaluator::new(TaskFamily::Regression, Metric::Rmse, &data, 5, 0)
            .unwrap()
            .evaluate(&model, &data, 1.0, &never())
            .unwrap();
        let r2 = Evaluator::new(TaskFamily::Regression, Metric::R2, &data, 5, 0)
            .unwrap()
            .evaluate(&model, &data, 1.0, &never())
            .unwrap();
        assert!(rmse.mean < 1e-3);
        assert!(r2.mean > 0.999);
    }

    #[test]
    fn survival_is_scored_at_the_median_event_time() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let n = 80;
        let mut x = Array2::<f64>::zeros((n, 1));
        let mut times = Array1::<f64>::zeros(n);
        let mut events = Array1::<f64>::zeros(n);
        for i in 0..n {
            x[[i, 0]] = rng.gen_range(-1.0..1.0);
            let u: f64 = rng.gen_range(1e-6..1.0);
            let t = -u.ln() / (2.0 * x[[i, 0]]).exp();
            let censor = rng.gen_range(0.5..4.0);
            times[i] = t.min(censor);
            events[i] = if t <= censor { 1.0 } else { 0.0 };
        }
        let data = Dataset::new(x, events.clone()).unwrap().with_time_to_event(times.clone()).unwrap();
        let evaluator = Evaluator::new(TaskFamily::Survival, Metric::CIndex, &data, 3, 0).unwrap();
        assert_eq!(evaluator.horizon(), default_horizon(&times, &events));

        let model = pipeline(PluginCategory::Survival, "cox_ph");
        let score = evaluator.evaluate(&model, &data, 1.0, &never()).unwrap();
        assert!(score.mean > 0.6, "c-index = {score}");
    }

    #[test]
    fn default_horizon_uses_event_times() {
        let times = array![1.0, 2.0, 3.0, 10.0];
        let events = array![1.0, 0.0, 1.0, 0.0];
        assert_eq!(default_horizon(&times, &events), 2.0);
        assert_eq!(default_horizon(&times, &array![0.0, 0.0, 0.0, 0.0]), 2.5);
    }

    #[test]
    fn out_of_fold_covers_held_out_rows() {
        let data = blobs(30, 6);
        let evaluator = Evaluator::new(TaskFamily::Classification, Metric::AucRoc, &data, 3, 0).unwrap();
        let model = pipeline(PluginCategory::Classifiers, "logistic_regression");
        let oof = evaluator.out_of_fold(&model, &data, &never()).unwrap();
        assert_eq!(oof.rows, (0..30).collect::<Vec<_>>());
        assert_eq!(oof.predictions.dim(), (30, 2));
        let score = evaluator.score_out_of_fold(&data, &oof.rows, &oof.predictions).unwrap();
        assert!(score > 0.95);
    }
}
