//! The capability contract every pipeline stage implements.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use ag_optimizer::{Configuration, ParameterValue, SearchSpace};
use ag_types::{AgError, AgResult, Dataset, PluginError, TaskFamily};

/// Registry category a plugin is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Imputers,
    FeatureScaling,
    Classifiers,
    Regression,
    Survival,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imputers => "imputers",
            Self::FeatureScaling => "feature_scaling",
            Self::Classifiers => "classifiers",
            Self::Regression => "regression",
            Self::Survival => "survival",
        }
    }

    /// Terminal estimator category for a task family.
    pub fn for_task(task: TaskFamily) -> Self {
        match task {
            TaskFamily::Classification => Self::Classifiers,
            TaskFamily::Regression => Self::Regression,
            TaskFamily::Survival => Self::Survival,
        }
    }

    pub fn is_estimator(&self) -> bool {
        matches!(self, Self::Classifiers | Self::Regression | Self::Survival)
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginCategory {
    type Err = AgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "imputers" => Ok(Self::Imputers),
            "feature_scaling" => Ok(Self::FeatureScaling),
            "classifiers" => Ok(Self::Classifiers),
            "regression" => Ok(Self::Regression),
            "survival" => Ok(Self::Survival),
            other => Err(AgError::Config(format!("unknown plugin category: {other}"))),
        }
    }
}

/// Main plugin trait that all pipeline stages must implement.
///
/// Transformers implement [`Plugin::transform`]; estimators implement the
/// prediction method(s) their task family needs. Anything not implemented
/// reports [`PluginError::Unsupported`].
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> PluginCategory;

    /// Fully qualified name, `<category>.<name>`.
    fn fqdn(&self) -> String {
        format!("{}.{}", self.category(), self.name())
    }

    fn hyperparameter_space(&self) -> SearchSpace;

    fn fit(&mut self, data: &Dataset) -> AgResult<()>;

    fn transform(&self, _x: &Array2<f64>) -> AgResult<Array2<f64>> {
        Err(unsupported(self.name(), "transform"))
    }

    fn predict(&self, _x: &Array2<f64>) -> AgResult<Array1<f64>> {
        Err(unsupported(self.name(), "predict"))
    }

    /// One column per class, in sorted label order.
    fn predict_proba(&self, _x: &Array2<f64>) -> AgResult<Array2<f64>> {
        Err(unsupported(self.name(), "predict_proba"))
    }

    /// Probability of the event by `horizon`.
    fn predict_risk(&self, _x: &Array2<f64>, _horizon: f64) -> AgResult<Array1<f64>> {
        Err(unsupported(self.name(), "predict_risk"))
    }

    /// Fitted state as JSON bytes, readable by the plugin's registered loader.
    fn save(&self) -> AgResult<Vec<u8>>;

    fn boxed_clone(&self) -> Box<dyn Plugin>;
}

impl Clone for Box<dyn Plugin> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plugin({})", self.fqdn())
    }
}

fn unsupported(name: &str, operation: &str) -> AgError {
    PluginError::Unsupported {
        name: name.to_string(),
        operation: operation.to_string(),
    }
    .into()
}

pub(crate) fn not_fitted(name: &str) -> AgError {
    PluginError::NotFitted {
        name: name.to_string(),
    }
    .into()
}

pub(crate) fn fit_failed(name: &str, message: impl Into<String>) -> AgError {
    PluginError::FitFailed {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

/// Reject inputs whose column count differs from what the plugin was fitted on.
pub(crate) fn check_width(expected: usize, x: &Array2<f64>) -> AgResult<()> {
    if x.ncols() != expected {
        return Err(PluginError::ShapeMismatch {
            expected: format!("{expected} columns"),
            actual: format!("{} columns", x.ncols()),
        }
        .into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Hyperparameter lookup
// ---------------------------------------------------------------------------

/// Typed accessors over a plugin's (unprefixed) configuration.
pub(crate) struct Params<'a> {
    plugin: &'a str,
    config: &'a Configuration,
}

impl<'a> Params<'a> {
    pub(crate) fn new(plugin: &'a str, config: &'a Configuration) -> Self {
        Self { plugin, config }
    }

    fn invalid(&self, parameter: &str, message: &str) -> AgError {
        PluginError::InvalidParameter {
            name: self.plugin.to_string(),
            parameter: parameter.to_string(),
            message: message.to_string(),
        }
        .into()
    }

    pub(crate) fn float(&self, name: &str, default: f64) -> AgResult<f64> {
        match self.config.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| self.invalid(name, "expected a finite number")),
        }
    }

    pub(crate) fn count(&self, name: &str, default: usize) -> AgResult<usize> {
        match self.config.get(name) {
            None => Ok(default),
            Some(v) => v
                .as_i64()
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| self.invalid(name, "expected a non-negative integer")),
        }
    }

    pub(crate) fn flag(&self, name: &str, default: bool) -> AgResult<bool> {
        match self.config.get(name) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.invalid(name, "expected a boolean")),
        }
    }

    /// A string choice that must be one of `allowed`.
    pub(crate) fn choice(&self, name: &str, allowed: &[&str], default: &str) -> AgResult<String> {
        let value = match self.config.get(name) {
            None => return Ok(default.to_string()),
            Some(ParameterValue::Json(v)) => v.as_str(),
            Some(_) => None,
        };
        match value {
            Some(v) if allowed.contains(&v) => Ok(v.to_string()),
            _ => Err(self.invalid(name, &format!("expected one of {allowed:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_round_trip() {
        for category in [
            PluginCategory::Imputers,
            PluginCategory::FeatureScaling,
            PluginCategory::Classifiers,
            PluginCategory::Regression,
            PluginCategory::Survival,
        ] {
            assert_eq!(category.as_str().parse::<PluginCategory>().unwrap(), category);
        }
        assert!("models".parse::<PluginCategory>().unwrap_err().is_config());
    }

    #[test]
    fn params_fall_back_to_defaults() {
        let config = Configuration::new();
        let params = Params::new("knn", &config);
        assert_eq!(params.count("n_neighbors", 5).unwrap(), 5);
        assert_eq!(params.choice("weights", &["uniform"], "uniform").unwrap(), "uniform");
    }

    #[test]
    fn params_reject_bad_values() {
        let mut config = Configuration::new();
        config.insert("n_neighbors".into(), ParameterValue::Int(-3));
        config.insert("weights".into(), ParameterValue::Json(serde_json::json!("cubic")));
        let params = Params::new("knn", &config);
        assert!(params.count("n_neighbors", 5).is_err());
        let err = params.choice("weights", &["uniform", "distance"], "uniform").unwrap_err();
        assert!(err.to_string().contains("weights"));
    }
}
