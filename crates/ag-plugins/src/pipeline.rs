//! Pipelines: preprocessing stages followed by one terminal estimator.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use ag_optimizer::{Configuration, SearchSpace};
use ag_types::{internal_error, validation_error, AgError, AgResult, Dataset, PluginError};

use crate::model::Model;
use crate::plugin::{Plugin, PluginCategory};
use crate::registry::PluginRegistry;

/// A registry address: category plus plugin name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    pub category: PluginCategory,
    pub name: String,
}

impl StageRef {
    pub fn new(category: PluginCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
        }
    }
}

impl fmt::Display for StageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.name)
    }
}

/// The stage layout of a pipeline, without hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineShape {
    /// Preprocessing stages in application order, then the estimator last.
    stages: Vec<StageRef>,
}

impl PipelineShape {
    pub fn new(preprocessing: Vec<StageRef>, estimator: StageRef) -> AgResult<Self> {
        if !estimator.category.is_estimator() {
            return Err(AgError::Config(format!("{estimator} is not an estimator")));
        }
        if let Some(stage) = preprocessing.iter().find(|s| s.category.is_estimator()) {
            return Err(AgError::Config(format!("{stage} cannot be a preprocessing stage")));
        }
        let mut stages = preprocessing;
        stages.push(estimator);
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[StageRef] {
        &self.stages
    }

    pub fn estimator(&self) -> &StageRef {
        &self.stages[self.stages.len() - 1]
    }

    /// Stage names joined with `+`, e.g. `"mean+scaler+logistic_regression"`.
    pub fn name(&self) -> String {
        self.stages
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Concatenation of every stage's space, each prefixed with its stage name.
    pub fn search_space(&self, registry: &PluginRegistry) -> AgResult<SearchSpace> {
        self.stages.iter().try_fold(SearchSpace::new(), |space, stage| {
            let own = registry.hyperparameter_space(stage.category, &stage.name)?;
            Ok(space.extend(own.prefixed(&stage.name)))
        })
    }

    /// Build an unfitted pipeline from a configuration over [`PipelineShape::search_space`].
    pub fn instantiate(&self, registry: &PluginRegistry, config: &Configuration) -> AgResult<Pipeline> {
        let stages = self
            .stages
            .iter()
            .map(|stage| registry.create(stage.category, &stage.name, &stage_config(config, &stage.name)))
            .collect::<AgResult<Vec<_>>>()?;
        Ok(Pipeline {
            shape: self.clone(),
            config: config.clone(),
            stages,
            fitted: false,
        })
    }
}

impl fmt::Display for PipelineShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Entries of `config` addressed to `stage`, with the prefix removed.
fn stage_config(config: &Configuration, stage: &str) -> Configuration {
    let prefix = format!("{stage}.");
    config
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(&prefix)
                .map(|name| (name.to_string(), value.clone()))
        })
        .collect()
}

/// Serialized form of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SavedPipeline {
    shape: PipelineShape,
    config: Configuration,
    fitted: bool,
    stages: Vec<serde_json::Value>,
}

/// A configured pipeline. Fitting runs each preprocessing stage on the output
/// of the previous one, then fits the estimator on the transformed features.
#[derive(Debug, Clone)]
pub struct Pipeline {
    shape: PipelineShape,
    config: Configuration,
    stages: Vec<Box<dyn Plugin>>,
    fitted: bool,
}

impl Pipeline {
    pub fn shape(&self) -> &PipelineShape {
        &self.shape
    }

    /// The hyperparameters this pipeline was built with.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    fn ensure_fitted(&self) -> AgResult<()> {
        if self.fitted {
            Ok(())
        } else {
            Err(PluginError::NotFitted {
                name: self.shape.name(),
            }
            .into())
        }
    }

    /// Run every preprocessing stage over `x`, returning the estimator input.
    fn preprocess(&self, x: &Array2<f64>) -> AgResult<(Array2<f64>, &dyn Plugin)> {
        self.ensure_fitted()?;
        let (estimator, transforms) = self
            .stages
            .split_last()
            .ok_or_else(|| internal_error!("pipeline has no stages"))?;
        let mut features = x.clone();
        for stage in transforms {
            features = stage.transform(&features)?;
        }
        Ok((features, estimator.as_ref()))
    }

    pub(crate) fn to_saved(&self) -> AgResult<SavedPipeline> {
        let stages = self
            .stages
            .iter()
            .map(|stage| -> AgResult<serde_json::Value> { Ok(serde_json::from_slice(&stage.save()?)?) })
            .collect::<AgResult<Vec<_>>>()?;
        Ok(SavedPipeline {
            shape: self.shape.clone(),
            config: self.config.clone(),
            fitted: self.fitted,
            stages,
        })
    }

    pub(crate) fn from_saved(saved: SavedPipeline, registry: &PluginRegistry) -> AgResult<Self> {
        if saved.stages.len() != saved.shape.stages.len() {
            return Err(validation_error!(
                "saved pipeline {} has {} stage states for {} stages",
                saved.shape,
                saved.stages.len(),
                saved.shape.stages.len()
            ));
        }
        let stages = saved
            .shape
            .stages
            .iter()
            .zip(saved.stages.iter())
            .map(|(stage, state)| -> AgResult<Box<dyn Plugin>> {
                registry.load(stage.category, &stage.name, &serde_json::to_vec(state)?)
            })
            .collect::<AgResult<Vec<_>>>()?;
        Ok(Self {
            shape: saved.shape,
            config: saved.config,
            stages,
            fitted: saved.fitted,
        })
    }

    /// Restore a pipeline from the bytes produced by [`Model::save`].
    pub fn load(bytes: &[u8], registry: &PluginRegistry) -> AgResult<Self> {
        Self::from_saved(serde_json::from_slice(bytes)?, registry)
    }
}

impl Model for Pipeline {
    fn name(&self) -> String {
        self.shape.name()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        self.fitted = false;
        let (estimator, transforms) = self
            .stages
            .split_last_mut()
            .ok_or_else(|| internal_error!("pipeline has no stages"))?;
        let mut current = data.clone();
        for stage in transforms.iter_mut() {
            stage.fit(&current)?;
            current.features = stage.transform(&current.features)?;
        }
        estimator.fit(&current)?;
        debug!(pipeline = %self.shape, rows = data.n_samples(), "fitted pipeline");
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        let (features, estimator) = self.preprocess(x)?;
        estimator.predict(&features)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let (features, estimator) = self.preprocess(x)?;
        estimator.predict_proba(&features)
    }

    fn predict_risk(&self, x: &Array2<f64>, horizon: f64) -> AgResult<Array1<f64>> {
        let (features, estimator) = self.preprocess(x)?;
        estimator.predict_risk(&features, horizon)
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_saved()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_optimizer::ParameterValue;
    use ndarray::array;

    fn shape() -> PipelineShape {
        PipelineShape::new(
            vec![
                StageRef::new(PluginCategory::Imputers, "median"),
                StageRef::new(PluginCategory::FeatureScaling, "scaler"),
            ],
            StageRef::new(PluginCategory::Classifiers, "logistic_regression"),
        )
        .unwrap()
    }

    fn data() -> Dataset {
        Dataset::new(
            array![[0.0, 1.0], [0.5, f64::NAN], [1.0, 0.5], [5.0, 9.0], [6.0, f64::NAN], [7.0, 8.0]],
            array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn shape_names_and_spaces_are_prefixed() {
        let registry = PluginRegistry::with_defaults();
        let shape = shape();
        assert_eq!(shape.name(), "median+scaler+logistic_regression");
        let names: Vec<String> = shape
            .search_space(&registry)
            .unwrap()
            .parameters
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "scaler.with_mean",
                "logistic_regression.C",
                "logistic_regression.max_iter",
                "logistic_regression.learning_rate"
            ]
        );
    }

    #[test]
    fn estimator_must_be_last() {
        let err = PipelineShape::new(
            vec![StageRef::new(PluginCategory::Classifiers, "perceptron")],
            StageRef::new(PluginCategory::Classifiers, "logistic_regression"),
        )
        .unwrap_err();
        assert!(err.is_config());
        assert!(PipelineShape::new(vec![], StageRef::new(PluginCategory::FeatureScaling, "scaler")).is_err());
    }

    #[test]
    fn stage_configs_are_routed_by_prefix() {
        let registry = PluginRegistry::with_defaults();
        let mut config = Configuration::new();
        config.insert("logistic_regression.max_iter".into(), ParameterValue::Int(-1));
        // A negative iteration count reaches the classifier and is rejected there
        assert!(shape().instantiate(&registry, &config).is_err());
    }

    #[test]
    fn fit_predict_through_all_stages() {
        let registry = PluginRegistry::with_defaults();
        let mut pipeline = shape().instantiate(&registry, &Configuration::new()).unwrap();
        assert!(pipeline.predict(&data().features).is_err());

        let data = data();
        pipeline.fit(&data).unwrap();
        let proba = pipeline.predict_proba(&data.features).unwrap();
        assert!(!proba.iter().any(|p| p.is_nan()));
        assert_eq!(pipeline.predict(&data.features).unwrap(), data.target);
    }

    #[test]
    fn save_load_reproduces_predictions() {
        let registry = PluginRegistry::with_defaults();
        let data = data();
        let mut pipeline = shape().instantiate(&registry, &Configuration::new()).unwrap();
        pipeline.fit(&data).unwrap();

        let restored = Pipeline::load(&pipeline.save().unwrap(), &registry).unwrap();
        assert_eq!(restored.shape(), pipeline.shape());
        assert!(restored.is_fitted());
        assert_eq!(
            restored.predict_proba(&data.features).unwrap(),
            pipeline.predict_proba(&data.features).unwrap()
        );
    }

    #[test]
    fn survival_pipeline_without_times_fails() {
        let registry = PluginRegistry::with_defaults();
        let shape = PipelineShape::new(vec![], StageRef::new(PluginCategory::Survival, "cox_ph")).unwrap();
        let mut pipeline = shape.instantiate(&registry, &Configuration::new()).unwrap();
        assert!(pipeline.fit(&data()).is_err());
        assert!(!pipeline.is_fitted());
    }
}
