//! Trial tracking and study run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ag_types::{Metric, ObjectiveDirection};

use crate::search::Configuration;

/// Unique study identifier.
pub type StudyId = Uuid;

/// Lifecycle state for a study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Aggregate status of a study, readable while the search runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyStatus {
    pub id: StudyId,
    pub study_name: String,
    pub metric: Metric,
    pub state: StudyState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialScore>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StudyStatus {
    pub fn new(study_name: impl Into<String>, metric: Metric) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_name: study_name.into(),
            metric,
            state: StudyState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = StudyState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = StudyState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = StudyState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn mark_cancelled(&mut self) {
        self.state = StudyState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Count a finished trial and keep it if it improves on the current best.
    pub fn record(&mut self, trial: &Trial) {
        match (&trial.status, &trial.result) {
            (TrialStatus::Completed, Some(result)) => {
                self.trials_completed += 1;
                if trial.is_full_budget() {
                    self.update_best(result);
                }
            }
            _ => self.trials_failed += 1,
        }
    }

    /// Update the best trial if `result` improves on the current best.
    pub fn update_best(&mut self, result: &TrialScore) {
        let dominated = match &self.best_trial {
            None => true,
            Some(current_best) => match self.metric.direction() {
                ObjectiveDirection::Maximize => result.score > current_best.score,
                ObjectiveDirection::Minimize => result.score < current_best.score,
            },
        };
        if dominated {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial: one configuration of one pipeline shape, evaluated once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub study_id: StudyId,
    pub trial_number: usize,
    /// Pipeline shape, e.g. `"scaler+logistic_regression"`.
    pub shape: String,
    pub parameters: Configuration,
    /// Fraction of each training fold used to fit.
    pub budget: f64,
    pub status: TrialStatus,
    pub result: Option<TrialScore>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        study_id: StudyId,
        trial_number: usize,
        shape: impl Into<String>,
        parameters: Configuration,
        budget: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            trial_number,
            shape: shape.into(),
            parameters,
            budget,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn is_full_budget(&self) -> bool {
        self.budget >= 1.0
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: TrialScore) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    /// Record a failure; `worst` carries the metric's sentinel score.
    pub fn mark_failed(&mut self, error: String, worst: TrialScore) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        self.result = Some(worst);
    }

    /// Milliseconds between start and finish, when both are known.
    pub fn elapsed_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => u64::try_from((end - start).num_milliseconds()).ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Evaluation outcome of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialScore {
    pub trial_id: Uuid,
    /// Mean metric value across folds, in the metric's own scale.
    #[serde(with = "ag_types::non_finite")]
    pub score: f64,
    /// Half-width of the 95% interval around `score`.
    pub std_err: f64,
    /// `score` mapped so that larger is always better.
    #[serde(with = "ag_types::non_finite")]
    pub objective: f64,
    pub fold_scores: Vec<f64>,
}

impl TrialScore {
    pub fn new(trial_id: Uuid, metric: Metric, score: f64, std_err: f64, fold_scores: Vec<f64>) -> Self {
        Self {
            trial_id,
            score,
            std_err,
            objective: metric.to_objective(score),
            fold_scores,
        }
    }

    /// Sentinel result recorded for a failed trial.
    pub fn worst(trial_id: Uuid, metric: Metric) -> Self {
        Self::new(trial_id, metric, metric.worst_score(), 0.0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;

    fn completed_trial(score: f64, budget: f64) -> Trial {
        let mut trial = Trial::new(Uuid::new_v4(), 0, "scaler+perceptron", Configuration::new(), budget);
        trial.mark_running();
        let result = TrialScore::new(trial.id, Metric::AucRoc, score, 0.01, vec![score]);
        trial.mark_completed(result);
        trial
    }

    #[test]
    fn failed_trial_with_infinite_sentinel_round_trips() {
        let mut trial = Trial::new(Uuid::new_v4(), 3, "linear_regression", Configuration::new(), 1.0);
        trial.mark_running();
        let worst = TrialScore::worst(trial.id, Metric::Rmse);
        trial.mark_failed("singular matrix".to_string(), worst);

        let json = serde_json::to_string(&trial).unwrap();
        let restored: Trial = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, trial);
        assert_eq!(restored.result.unwrap().score, f64::INFINITY);

        let r2 = TrialScore::worst(Uuid::new_v4(), Metric::R2);
        let restored: TrialScore = serde_json::from_str(&serde_json::to_string(&r2).unwrap()).unwrap();
        assert_eq!(restored.score, f64::NEG_INFINITY);
        assert_eq!(restored.objective, f64::NEG_INFINITY);
    }

    #[test]
    fn study_status_lifecycle() {
        let mut status = StudyStatus::new("test_classifiers", Metric::AucRoc);

        assert_eq!(status.state, StudyState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, StudyState::Running);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, StudyState::Completed);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut status = StudyStatus::new("auc", Metric::AucRoc);
        status.record(&completed_trial(0.7, 1.0));
        status.record(&completed_trial(0.9, 1.0));
        status.record(&completed_trial(0.8, 1.0));
        assert_eq!(status.best_trial.as_ref().unwrap().score, 0.9);
        assert_eq!(status.trials_completed, 3);
    }

    #[test]
    fn best_trial_tracking_minimize() {
        let mut status = StudyStatus::new("rmse", Metric::Rmse);
        let id = Uuid::new_v4();
        status.update_best(&TrialScore::new(id, Metric::Rmse, 3.0, 0.1, vec![]));
        status.update_best(&TrialScore::new(id, Metric::Rmse, 1.5, 0.1, vec![]));
        status.update_best(&TrialScore::new(id, Metric::Rmse, 2.0, 0.1, vec![]));
        let best = status.best_trial.as_ref().unwrap();
        assert_eq!(best.score, 1.5);
        assert_eq!(best.objective, -1.5);
    }

    #[test]
    fn partial_budget_trials_never_become_best() {
        let mut status = StudyStatus::new("hb", Metric::AucRoc);
        status.record(&completed_trial(0.99, 1.0 / 9.0));
        assert!(status.best_trial.is_none());
        assert_eq!(status.trials_completed, 1);
    }

    #[test]
    fn trial_lifecycle() {
        let mut params = Configuration::new();
        params.insert("perceptron.max_iter".into(), ParameterValue::Int(30));

        let mut trial = Trial::new(Uuid::new_v4(), 1, "perceptron", params, 1.0);
        assert_eq!(trial.status, TrialStatus::Pending);

        trial.mark_running();
        assert_eq!(trial.status, TrialStatus::Running);

        let result = TrialScore::new(trial.id, Metric::AucRoc, 0.93, 0.02, vec![0.92, 0.94]);
        trial.mark_completed(result);
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert!(trial.elapsed_ms().is_some());
        assert_eq!(trial.result.as_ref().unwrap().score, 0.93);
    }

    #[test]
    fn trial_failure_records_sentinel() {
        let mut trial = Trial::new(Uuid::new_v4(), 0, "linear_regression", Configuration::new(), 1.0);
        trial.mark_running();
        trial.mark_failed("singular matrix".into(), TrialScore::worst(trial.id, Metric::Rmse));
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("singular matrix"));
        assert_eq!(trial.result.as_ref().unwrap().score, f64::INFINITY);

        let mut status = StudyStatus::new("reg", Metric::Rmse);
        status.record(&trial);
        assert_eq!(status.trials_failed, 1);
        assert!(status.best_trial.is_none());
    }
}
