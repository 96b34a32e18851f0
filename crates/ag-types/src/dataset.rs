//! Tabular datasets handed to a search.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{AgError, AgResult};
use crate::task::TaskFamily;

/// Features plus target, with the optional columns some task families need.
///
/// For survival tasks `target` holds the event indicator (1 = event observed,
/// 0 = censored) and `time_to_event` the observed durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub target: Array1<f64>,
    pub time_to_event: Option<Array1<f64>>,
    /// Rows sharing a group id are never split across train and held-out folds.
    pub group_ids: Option<Array1<i64>>,
}

impl Dataset {
    pub fn new(features: Array2<f64>, target: Array1<f64>) -> AgResult<Self> {
        if features.nrows() == 0 {
            return Err(AgError::Validation("dataset has no rows".to_string()));
        }
        if features.ncols() == 0 {
            return Err(AgError::Validation("dataset has no feature columns".to_string()));
        }
        if target.len() != features.nrows() {
            return Err(AgError::Validation(format!(
                "target length {} does not match row count {}",
                target.len(),
                features.nrows()
            )));
        }
        Ok(Self {
            features,
            target,
            time_to_event: None,
            group_ids: None,
        })
    }

    pub fn with_time_to_event(mut self, times: Array1<f64>) -> AgResult<Self> {
        if times.len() != self.n_samples() {
            return Err(AgError::Validation(format!(
                "time_to_event length {} does not match row count {}",
                times.len(),
                self.n_samples()
            )));
        }
        self.time_to_event = Some(times);
        Ok(self)
    }

    pub fn with_group_ids(mut self, groups: Array1<i64>) -> AgResult<Self> {
        if groups.len() != self.n_samples() {
            return Err(AgError::Validation(format!(
                "group_ids length {} does not match row count {}",
                groups.len(),
                self.n_samples()
            )));
        }
        self.group_ids = Some(groups);
        Ok(self)
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Sorted distinct target values (the class labels for classification).
    pub fn classes(&self) -> Vec<f64> {
        let mut classes: Vec<f64> = self.target.iter().copied().collect();
        classes.sort_by(|a, b| a.total_cmp(b));
        classes.dedup();
        classes
    }

    pub fn has_missing(&self) -> bool {
        self.features.iter().any(|v| v.is_nan())
    }

    /// Rows at `indices`, in that order, with every optional column carried along.
    pub fn select(&self, indices: &[usize]) -> Dataset {
        Dataset {
            features: self.features.select(Axis(0), indices),
            target: self.target.select(Axis(0), indices),
            time_to_event: self
                .time_to_event
                .as_ref()
                .map(|t| t.select(Axis(0), indices)),
            group_ids: self.group_ids.as_ref().map(|g| g.select(Axis(0), indices)),
        }
    }

    /// Check the columns a task family requires before any trial runs.
    pub fn validate_for(&self, task: TaskFamily) -> AgResult<()> {
        if self.target.iter().any(|v| !v.is_finite()) {
            return Err(AgError::Validation("target contains non-finite values".to_string()));
        }
        match task {
            TaskFamily::Classification => {
                if self.classes().len() < 2 {
                    return Err(AgError::Validation(
                        "classification needs at least two distinct labels".to_string(),
                    ));
                }
            }
            TaskFamily::Regression => {}
            TaskFamily::Survival => {
                let times = self.time_to_event.as_ref().ok_or_else(|| {
                    AgError::Validation("survival tasks require time_to_event".to_string())
                })?;
                if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
                    return Err(AgError::Validation(
                        "time_to_event must be finite and non-negative".to_string(),
                    ));
                }
                if self.target.iter().any(|e| *e != 0.0 && *e != 1.0) {
                    return Err(AgError::Validation(
                        "survival event indicator must be 0 or 1".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}
