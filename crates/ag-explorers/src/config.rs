//! Study configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use ag_optimizer::OptimizerType;
use ag_plugins::{PluginCategory, PluginRegistry};
use ag_types::{config_error, AgResult, Metric, TaskFamily};

/// Environment variable that overrides `random_state` for configs loaded from JSON.
pub const RANDOM_STATE_ENV: &str = "AUGUR_RANDOM_STATE";

/// How an ensemble search proposes weight vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightSearch {
    /// Forward selection from the best single member.
    #[default]
    Greedy,
    /// Dirichlet-distributed proposals over the whole pool.
    Random,
}

/// Everything one search needs to know, fixed before the search starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StudyConfig {
    pub study_name: String,

    /// Number of cross-validation folds; 0 evaluates on a single holdout split.
    pub cv: usize,

    /// Trial budget for each pipeline shape.
    pub num_iter: usize,

    /// Size of the ranked pool returned to the caller.
    pub top_k: usize,

    /// Wall-clock budget for the whole search, in seconds.
    pub timeout: Option<f64>,

    /// Metric to optimize; the task family's default when unset.
    pub metric: Option<Metric>,

    /// Imputer names; an empty list means no imputation stage.
    pub imputers: Vec<String>,

    /// Feature scaling names; an empty list means no scaling stage.
    pub feature_scaling: Vec<String>,

    /// Estimator names from the task's category; empty means every
    /// registered estimator.
    #[serde(alias = "classifiers", alias = "regressors", alias = "survival_models")]
    pub estimators: Vec<String>,

    pub optimizer_type: OptimizerType,

    /// Abort the search on the first trial error instead of scoring it as
    /// the metric's worst value.
    pub strict: bool,

    pub random_state: u64,

    /// Pool width for ensemble searches.
    pub ensemble_size: usize,

    /// Weight proposals tried by an ensemble search.
    pub num_ensemble_iter: usize,

    pub ensemble_strategy: WeightSearch,

    /// Survival evaluation time; the median event time when unset.
    pub time_horizon: Option<f64>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            study_name: "augur_study".to_string(),
            cv: 5,
            num_iter: 20,
            top_k: 3,
            timeout: None,
            metric: None,
            imputers: Vec::new(),
            feature_scaling: Vec::new(),
            estimators: Vec::new(),
            optimizer_type: OptimizerType::Bayesian,
            strict: false,
            random_state: 0,
            ensemble_size: 3,
            num_ensemble_iter: 10,
            ensemble_strategy: WeightSearch::Greedy,
            time_horizon: None,
        }
    }
}

impl StudyConfig {
    pub fn new(study_name: impl Into<String>) -> Self {
        Self {
            study_name: study_name.into(),
            ..Self::default()
        }
    }

    pub fn with_cv(mut self, cv: usize) -> Self {
        self.cv = cv;
        self
    }

    pub fn with_num_iter(mut self, n: usize) -> Self {
        self.num_iter = n;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_imputers<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.imputers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_feature_scaling<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.feature_scaling = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_estimators<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.estimators = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_optimizer(mut self, optimizer_type: OptimizerType) -> Self {
        self.optimizer_type = optimizer_type;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_ensemble(mut self, ensemble_size: usize, num_ensemble_iter: usize) -> Self {
        self.ensemble_size = ensemble_size;
        self.num_ensemble_iter = num_ensemble_iter;
        self
    }

    pub fn with_ensemble_strategy(mut self, strategy: WeightSearch) -> Self {
        self.ensemble_strategy = strategy;
        self
    }

    pub fn with_time_horizon(mut self, horizon: f64) -> Self {
        self.time_horizon = Some(horizon);
        self
    }

    /// Parse a JSON config. Unknown or mistyped fields are configuration
    /// errors; [`RANDOM_STATE_ENV`] overrides `random_state` when set.
    pub fn from_json_str(json: &str) -> AgResult<Self> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| config_error!("invalid study config: {}", e))?;
        if let Ok(seed) = std::env::var(RANDOM_STATE_ENV) {
            config.random_state = seed
                .trim()
                .parse()
                .map_err(|_| config_error!("{} must be an unsigned integer, got {:?}", RANDOM_STATE_ENV, seed))?;
        }
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> AgResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// The metric this study optimizes for `task`.
    pub fn metric_for(&self, task: TaskFamily) -> Metric {
        self.metric.unwrap_or_else(|| task.default_metric())
    }

    /// Wall-clock budget; values too large for a `Duration` saturate.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    /// Estimator names to search for `task`, expanding an empty list to every
    /// registered estimator of the task's category.
    pub fn estimators_for(&self, task: TaskFamily, registry: &PluginRegistry) -> Vec<String> {
        if self.estimators.is_empty() {
            registry
                .list(PluginCategory::for_task(task))
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            self.estimators.clone()
        }
    }

    /// Reject anything that would fail once the search is running.
    pub fn validate(&self, task: TaskFamily, registry: &PluginRegistry) -> AgResult<()> {
        if self.study_name.trim().is_empty() {
            return Err(config_error!("study_name must not be empty"));
        }
        if self.cv == 1 {
            return Err(config_error!("cv must be 0 (holdout) or at least 2, got 1"));
        }
        if self.num_iter == 0 {
            return Err(config_error!("num_iter must be at least 1"));
        }
        if self.top_k == 0 {
            return Err(config_error!("top_k must be at least 1"));
        }
        if self.ensemble_size == 0 {
            return Err(config_error!("ensemble_size must be at least 1"));
        }
        if self.num_ensemble_iter == 0 {
            return Err(config_error!("num_ensemble_iter must be at least 1"));
        }
        if let Some(timeout) = self.timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(config_error!("timeout must be a positive number of seconds, got {}", timeout));
            }
            if Duration::try_from_secs_f64(timeout).is_err() {
                return Err(config_error!("timeout of {} seconds is too large", timeout));
            }
        }
        if let Some(horizon) = self.time_horizon {
            if !(horizon.is_finite() && horizon > 0.0) {
                return Err(config_error!("time_horizon must be positive, got {}", horizon));
            }
        }

        let metric = self.metric_for(task);
        if !task.supports(metric) {
            let allowed: Vec<&str> = task.metrics().iter().map(|m| m.name()).collect();
            return Err(config_error!(
                "metric {} is not available for {} tasks (expected one of {:?})",
                metric,
                task,
                allowed
            ));
        }

        let lists = [
            (PluginCategory::Imputers, &self.imputers),
            (PluginCategory::FeatureScaling, &self.feature_scaling),
            (PluginCategory::for_task(task), &self.estimators),
        ];
        for (category, names) in lists {
            if let Some(name) = names.iter().find(|n| !registry.contains(category, n)) {
                return Err(config_error!("unknown plugin {}.{}", category, name));
            }
        }
        if self.estimators_for(task, registry).is_empty() {
            return Err(config_error!("no {} estimators are registered", task));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PluginRegistry {
        PluginRegistry::with_defaults()
    }

    #[test]
    fn defaults_are_valid_for_every_task() {
        let config = StudyConfig::default();
        for task in [TaskFamily::Classification, TaskFamily::Regression, TaskFamily::Survival] {
            config.validate(task, &registry()).unwrap();
        }
        assert_eq!(config.metric_for(TaskFamily::Regression), Metric::Rmse);
    }

    #[test]
    fn builder_sets_fields() {
        let config = StudyConfig::new("builder")
            .with_cv(3)
            .with_num_iter(7)
            .with_top_k(2)
            .with_timeout(Duration::from_millis(1500))
            .with_feature_scaling(["scaler", "minmax_scaler"])
            .with_estimators(["perceptron"])
            .with_optimizer(OptimizerType::Hyperband)
            .with_ensemble(4, 12);
        assert_eq!(config.cv, 3);
        assert_eq!(config.num_iter, 7);
        assert_eq!(config.timeout_duration(), Some(Duration::from_millis(1500)));
        assert_eq!(config.feature_scaling, vec!["scaler", "minmax_scaler"]);
        assert_eq!(config.ensemble_size, 4);
        config.validate(TaskFamily::Classification, &registry()).unwrap();
    }

    #[test]
    fn out_of_range_values_are_config_errors() {
        let task = TaskFamily::Classification;
        for config in [
            StudyConfig::default().with_cv(1),
            StudyConfig::default().with_num_iter(0),
            StudyConfig::default().with_top_k(0),
            StudyConfig::default().with_ensemble(0, 5),
            StudyConfig::default().with_metric(Metric::Rmse),
            StudyConfig::default().with_estimators(["random_forest"]),
            StudyConfig::default().with_feature_scaling(["logistic_regression"]),
            StudyConfig::new(" "),
        ] {
            let err = config.validate(task, &registry()).unwrap_err();
            assert!(err.is_config(), "{err}");
        }
    }

    #[test]
    fn unknown_plugin_error_names_it() {
        let err = StudyConfig::default()
            .with_imputers(["mice"])
            .validate(TaskFamily::Regression, &registry())
            .unwrap_err();
        assert!(err.to_string().contains("imputers.mice"));
    }

    #[test]
    fn json_config_uses_defaults_and_aliases() {
        let config = StudyConfig::from_json_str(
            r#"{"study_name": "from_json", "cv": 3, "metric": "aucprc",
                "classifiers": ["perceptron"], "optimizer_type": "hyperband"}"#,
        )
        .unwrap();
        assert_eq!(config.study_name, "from_json");
        assert_eq!(config.metric, Some(Metric::AucPrc));
        assert_eq!(config.estimators, vec!["perceptron"]);
        assert_eq!(config.optimizer_type, OptimizerType::Hyperband);
        assert_eq!(config.num_iter, 20);
    }

    #[test]
    fn negative_cv_in_json_is_config_error() {
        let err = StudyConfig::from_json_str(r#"{"cv": -1}"#).unwrap_err();
        assert!(err.is_config());
        let err = StudyConfig::from_json_str(r#"{"metric": "accuracy"}"#).unwrap_err();
        assert!(err.is_config());
        let err = StudyConfig::from_json_str(r#"{"num_iters": 5}"#).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn huge_timeout_is_a_config_error() {
        let config = StudyConfig::from_json_str(r#"{"timeout": 1e20}"#).unwrap();
        assert_eq!(config.timeout_duration(), Some(Duration::MAX));
        let err = config.validate(TaskFamily::Classification, &registry()).unwrap_err();
        assert!(err.is_config(), "{err}");
    }

    #[test]
    fn empty_estimator_list_expands_to_registry() {
        let names = StudyConfig::default().estimators_for(TaskFamily::Regression, &registry());
        assert_eq!(names, vec!["kneighbors_regressor", "linear_regression"]);
    }
}
