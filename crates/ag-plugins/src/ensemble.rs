//! Weighted ensembles: a convex combination of fitted pipelines.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use ag_types::{validation_error, AgResult, Dataset, TaskFamily};

use crate::classifiers::argmax_labels;
use crate::model::Model;
use crate::pipeline::{Pipeline, SavedPipeline};
use crate::registry::PluginRegistry;

/// Weighted average of equally shaped prediction matrices.
pub fn weighted_average(predictions: &[Array2<f64>], weights: &[f64]) -> AgResult<Array2<f64>> {
    let first = predictions
        .first()
        .ok_or_else(|| validation_error!("no predictions to combine"))?;
    if predictions.len() != weights.len() {
        return Err(validation_error!(
            "{} predictions but {} weights",
            predictions.len(),
            weights.len()
        ));
    }
    let mut combined = Array2::<f64>::zeros(first.raw_dim());
    for (prediction, weight) in predictions.iter().zip(weights) {
        if prediction.dim() != first.dim() {
            return Err(validation_error!(
                "prediction shape {:?} differs from {:?}",
                prediction.dim(),
                first.dim()
            ));
        }
        combined.scaled_add(*weight, prediction);
    }
    Ok(combined)
}

/// Check weights are finite and non-negative, then rescale them to sum to one.
fn normalize(weights: Vec<f64>) -> AgResult<Vec<f64>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(validation_error!("ensemble weights must be non-negative, got {weights:?}"));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(validation_error!("ensemble weights sum to zero"));
    }
    Ok(weights.into_iter().map(|w| w / total).collect())
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedEnsemble {
    task: TaskFamily,
    classes: Vec<f64>,
    weights: Vec<f64>,
    members: Vec<SavedPipeline>,
}

/// A pipeline built from other pipelines.
///
/// Predictions are the weighted average of member predictions (class
/// probabilities, regression values or survival risks). Refitting refits
/// every member and keeps the weights.
#[derive(Debug, Clone)]
pub struct WeightedEnsemble {
    task: TaskFamily,
    /// Sorted class labels, used to turn averaged probabilities into labels.
    classes: Vec<f64>,
    members: Vec<(Pipeline, f64)>,
}

impl WeightedEnsemble {
    pub fn new(task: TaskFamily, members: Vec<(Pipeline, f64)>) -> AgResult<Self> {
        if members.is_empty() {
            return Err(validation_error!("an ensemble needs at least one member"));
        }
        let (pipelines, weights): (Vec<Pipeline>, Vec<f64>) = members.into_iter().unzip();
        let weights = normalize(weights)?;
        Ok(Self {
            task,
            classes: Vec::new(),
            members: pipelines.into_iter().zip(weights).collect(),
        })
    }

    /// Class labels for members that were fitted before joining the ensemble.
    pub fn with_classes(mut self, classes: Vec<f64>) -> Self {
        self.classes = classes;
        self
    }

    pub fn task(&self) -> TaskFamily {
        self.task
    }

    pub fn members(&self) -> &[(Pipeline, f64)] {
        &self.members
    }

    pub fn weights(&self) -> Vec<f64> {
        self.members.iter().map(|(_, w)| *w).collect()
    }

    fn combine<F>(&self, predict: F) -> AgResult<Array2<f64>>
    where
        F: Fn(&Pipeline) -> AgResult<Array2<f64>>,
    {
        let predictions = self
            .members
            .iter()
            .map(|(member, _)| predict(member))
            .collect::<AgResult<Vec<_>>>()?;
        weighted_average(&predictions, &self.weights())
    }

    /// Restore an ensemble from the bytes produced by [`Model::save`].
    pub fn load(bytes: &[u8], registry: &PluginRegistry) -> AgResult<Self> {
        let saved: SavedEnsemble = serde_json::from_slice(bytes)?;
        let pipelines = saved
            .members
            .into_iter()
            .map(|member| Pipeline::from_saved(member, registry))
            .collect::<AgResult<Vec<_>>>()?;
        if pipelines.len() != saved.weights.len() {
            return Err(validation_error!("saved ensemble weights do not match members"));
        }
        Ok(Self {
            task: saved.task,
            classes: saved.classes,
            members: pipelines.into_iter().zip(saved.weights).collect(),
        })
    }
}

impl Model for WeightedEnsemble {
    fn name(&self) -> String {
        let parts: Vec<String> = self
            .members
            .iter()
            .map(|(member, weight)| format!("{:.3}*{}", weight, member.name()))
            .collect();
        format!("ensemble({})", parts.join(", "))
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        for (member, _) in self.members.iter_mut() {
            member.fit(data)?;
        }
        if self.task == TaskFamily::Classification {
            self.classes = data.classes();
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        match self.task {
            TaskFamily::Classification => {
                if self.classes.is_empty() {
                    return Err(validation_error!("ensemble has no class labels"));
                }
                Ok(argmax_labels(&self.predict_proba(x)?, &self.classes))
            }
            TaskFamily::Regression | TaskFamily::Survival => {
                let combined = self.combine(|m| Ok(m.predict(x)?.insert_axis(Axis(1))))?;
                Ok(combined.column(0).to_owned())
            }
        }
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        self.combine(|m| m.predict_proba(x))
    }

    fn predict_risk(&self, x: &Array2<f64>, horizon: f64) -> AgResult<Array1<f64>> {
        let combined = self.combine(|m| Ok(m.predict_risk(x, horizon)?.insert_axis(Axis(1))))?;
        Ok(combined.column(0).to_owned())
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        let members = self
            .members
            .iter()
            .map(|(member, _)| member.to_saved())
            .collect::<AgResult<Vec<_>>>()?;
        let saved = SavedEnsemble {
            task: self.task,
            classes: self.classes.clone(),
            weights: self.weights(),
            members,
        };
        Ok(serde_json::to_vec(&saved)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineShape, StageRef};
    use crate::plugin::PluginCategory;
    use ag_optimizer::Configuration;
    use ndarray::array;

    fn regression_member(name: &str, data: &Dataset) -> Pipeline {
        let registry = PluginRegistry::with_defaults();
        let shape = PipelineShape::new(vec![], StageRef::new(PluginCategory::Regression, name)).unwrap();
        let mut pipeline = shape.instantiate(&registry, &Configuration::new()).unwrap();
        pipeline.fit(data).unwrap();
        pipeline
    }

    fn line() -> Dataset {
        Dataset::new(array![[0.0], [1.0], [2.0], [3.0]], array![1.0, 3.0, 5.0, 7.0]).unwrap()
    }

    #[test]
    fn weighted_average_combines_rows() {
        let a = array![[1.0, 0.0], [0.0, 1.0]];
        let b = array![[0.0, 1.0], [1.0, 0.0]];
        let combined = weighted_average(&[a, b], &[0.75, 0.25]).unwrap();
        assert_eq!(combined, array![[0.75, 0.25], [0.25, 0.75]]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = array![[1.0]];
        let b = array![[1.0, 2.0]];
        assert!(weighted_average(&[a, b], &[0.5, 0.5]).is_err());
    }

    #[test]
    fn weights_are_normalized_and_validated() {
        let data = line();
        let member = regression_member("linear_regression", &data);
        let ensemble =
            WeightedEnsemble::new(TaskFamily::Regression, vec![(member.clone(), 2.0), (member.clone(), 6.0)])
                .unwrap();
        assert_eq!(ensemble.weights(), vec![0.25, 0.75]);
        assert!(WeightedEnsemble::new(TaskFamily::Regression, vec![(member.clone(), -1.0)]).is_err());
        assert!(WeightedEnsemble::new(TaskFamily::Regression, vec![]).is_err());
    }

    #[test]
    fn regression_ensemble_averages_members() {
        let data = line();
        let linear = regression_member("linear_regression", &data);
        let knn = regression_member("kneighbors_regressor", &data);
        let x = array![[1.5]];
        let expected = 0.5 * linear.predict(&x).unwrap()[0] + 0.5 * knn.predict(&x).unwrap()[0];
        let ensemble = WeightedEnsemble::new(TaskFamily::Regression, vec![(linear, 1.0), (knn, 1.0)]).unwrap();
        assert!((ensemble.predict(&x).unwrap()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn refit_keeps_weights() {
        let data = line();
        let member = regression_member("linear_regression", &data);
        let mut ensemble =
            WeightedEnsemble::new(TaskFamily::Regression, vec![(member.clone(), 0.25), (member, 0.75)]).unwrap();
        let shifted = Dataset::new(array![[0.0], [1.0], [2.0]], array![10.0, 11.0, 12.0]).unwrap();
        ensemble.fit(&shifted).unwrap();
        assert_eq!(ensemble.weights(), vec![0.25, 0.75]);
        assert!((ensemble.predict(&array![[0.0]]).unwrap()[0] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn save_load_reproduces_predictions() {
        let registry = PluginRegistry::with_defaults();
        let data = line();
        let ensemble = WeightedEnsemble::new(
            TaskFamily::Regression,
            vec![
                (regression_member("linear_regression", &data), 0.4),
                (regression_member("kneighbors_regressor", &data), 0.6),
            ],
        )
        .unwrap();
        let restored = WeightedEnsemble::load(&ensemble.save().unwrap(), &registry).unwrap();
        assert_eq!(restored.weights(), ensemble.weights());
        assert_eq!(
            restored.predict(&data.features).unwrap(),
            ensemble.predict(&data.features).unwrap()
        );
        assert!(restored.name().starts_with("ensemble(0.400*linear_regression"));
    }
}
