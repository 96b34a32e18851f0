//! The fit/predict contract shared by pipelines and ensembles.

use ndarray::{Array1, Array2};

use ag_types::{AgResult, Dataset};

/// Anything a search can hand back to the caller as a trained model.
pub trait Model: Send + Sync {
    fn name(&self) -> String;

    fn fit(&mut self, data: &Dataset) -> AgResult<()>;

    /// Class labels for classifiers, values for regressors, risk scores for
    /// survival models.
    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>>;

    fn predict_proba(&self, x: &Array2<f64>) -> AgResult<Array2<f64>>;

    /// Probability of the event by `horizon`.
    fn predict_risk(&self, x: &Array2<f64>, horizon: f64) -> AgResult<Array1<f64>>;

    fn save(&self) -> AgResult<Vec<u8>>;
}
