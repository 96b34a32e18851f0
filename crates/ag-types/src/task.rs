//! Task families and the metrics each one recognizes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AgError;

/// The kind of supervised problem being searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskFamily {
    Classification,
    Regression,
    Survival,
}

impl TaskFamily {
    /// Registry category holding the terminal estimators for this task.
    pub fn estimator_category(&self) -> &'static str {
        match self {
            Self::Classification => "classifiers",
            Self::Regression => "regression",
            Self::Survival => "survival",
        }
    }

    pub fn default_metric(&self) -> Metric {
        match self {
            Self::Classification => Metric::AucRoc,
            Self::Regression => Metric::Rmse,
            Self::Survival => Metric::CIndex,
        }
    }

    /// Metrics accepted by a study of this task family.
    pub fn metrics(&self) -> &'static [Metric] {
        match self {
            Self::Classification => &[Metric::AucRoc, Metric::AucPrc],
            Self::Regression => &[Metric::Rmse, Metric::Mae, Metric::R2],
            Self::Survival => &[Metric::CIndex, Metric::BrierScore],
        }
    }

    pub fn supports(&self, metric: Metric) -> bool {
        self.metrics().contains(&metric)
    }
}

impl fmt::Display for TaskFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Classification => "classification",
            Self::Regression => "regression",
            Self::Survival => "survival",
        };
        f.write_str(name)
    }
}

/// Whether a metric improves upwards or downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

/// A scoring metric, addressed by its configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "aucroc")]
    AucRoc,
    #[serde(rename = "aucprc")]
    AucPrc,
    #[serde(rename = "c_index")]
    CIndex,
    #[serde(rename = "brier_score")]
    BrierScore,
    #[serde(rename = "rmse")]
    Rmse,
    #[serde(rename = "mae")]
    Mae,
    #[serde(rename = "r2")]
    R2,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AucRoc => "aucroc",
            Self::AucPrc => "aucprc",
            Self::CIndex => "c_index",
            Self::BrierScore => "brier_score",
            Self::Rmse => "rmse",
            Self::Mae => "mae",
            Self::R2 => "r2",
        }
    }

    pub fn direction(&self) -> ObjectiveDirection {
        match self {
            Self::AucRoc | Self::AucPrc | Self::CIndex | Self::R2 => ObjectiveDirection::Maximize,
            Self::BrierScore | Self::Rmse | Self::Mae => ObjectiveDirection::Minimize,
        }
    }

    /// Score recorded for a trial that failed to produce predictions.
    pub fn worst_score(&self) -> f64 {
        match self {
            Self::AucRoc | Self::AucPrc | Self::CIndex => 0.0,
            Self::BrierScore => 1.0,
            Self::R2 => f64::NEG_INFINITY,
            Self::Rmse | Self::Mae => f64::INFINITY,
        }
    }

    /// Map a raw score onto the "higher is better" scale the optimizers use.
    pub fn to_objective(&self, score: f64) -> f64 {
        match self.direction() {
            ObjectiveDirection::Maximize => score,
            ObjectiveDirection::Minimize => -score,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = AgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aucroc" => Ok(Self::AucRoc),
            "aucprc" => Ok(Self::AucPrc),
            "c_index" => Ok(Self::CIndex),
            "brier_score" => Ok(Self::BrierScore),
            "rmse" => Ok(Self::Rmse),
            "mae" => Ok(Self::Mae),
            "r2" => Ok(Self::R2),
            other => Err(AgError::Config(format!("unknown metric: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_round_trip_through_from_str() {
        for task in [
            TaskFamily::Classification,
            TaskFamily::Regression,
            TaskFamily::Survival,
        ] {
            for metric in task.metrics() {
                assert_eq!(metric.name().parse::<Metric>().unwrap(), *metric);
            }
        }
    }

    #[test]
    fn unknown_metric_is_config_error() {
        let err = "invalid".parse::<Metric>().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn worst_score_is_worse_than_any_objective() {
        for metric in [Metric::AucRoc, Metric::Rmse, Metric::BrierScore, Metric::R2] {
            let worst = metric.to_objective(metric.worst_score());
            let typical = metric.to_objective(0.5);
            assert!(worst <= typical, "{metric}: {worst} > {typical}");
        }
    }

    #[test]
    fn metric_serializes_with_config_name() {
        let json = serde_json::to_string(&Metric::AucPrc).unwrap();
        assert_eq!(json, "\"aucprc\"");
        let back: Metric = serde_json::from_str("\"c_index\"").unwrap();
        assert_eq!(back, Metric::CIndex);
    }

    #[test]
    fn task_family_checks_metric_membership() {
        assert!(TaskFamily::Classification.supports(Metric::AucPrc));
        assert!(!TaskFamily::Classification.supports(Metric::Rmse));
        assert_eq!(TaskFamily::Survival.estimator_category(), "survival");
    }
}
