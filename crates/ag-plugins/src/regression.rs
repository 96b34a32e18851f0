//! Built-in regressors.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use ag_optimizer::{Configuration, SearchSpace};
use ag_types::{AgResult, Dataset};

use crate::plugin::{check_width, fit_failed, not_fitted, Params, Plugin, PluginCategory};
use crate::registry::PluginRegistry;

pub(crate) fn register(registry: &mut PluginRegistry) {
    registry
        .register(
            PluginCategory::Regression,
            "linear_regression",
            LinearRegression::space(),
            |c| Ok(Box::new(LinearRegression::new(c)?) as Box<dyn Plugin>),
            |b| Ok(Box::new(serde_json::from_slice::<LinearRegression>(b)?) as Box<dyn Plugin>),
        )
        .register(
            PluginCategory::Regression,
            "kneighbors_regressor",
            KNeighborsRegressor::space(),
            |c| Ok(Box::new(KNeighborsRegressor::new(c)?) as Box<dyn Plugin>),
            |b| Ok(Box::new(serde_json::from_slice::<KNeighborsRegressor>(b)?) as Box<dyn Plugin>),
        );
}

/// Solve the symmetric positive-definite system `a · x = b`.
pub(crate) fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let matrix = DMatrix::from_fn(n, n, |i, j| a[[i, j]]);
    let rhs = DVector::from_iterator(n, b.iter().copied());
    let solution = matrix.cholesky()?.solve(&rhs);
    Some(solution.iter().copied().collect())
}

// ---------------------------------------------------------------------------
// Linear regression
// ---------------------------------------------------------------------------

/// Ridge-regularized least squares solved through the normal equations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    alpha: f64,
    fit_intercept: bool,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl LinearRegression {
    pub fn space() -> SearchSpace {
        SearchSpace::new()
            .add_log_uniform("alpha", 1e-6, 10.0)
            .add_categorical("fit_intercept", vec![serde_json::json!(true), serde_json::json!(false)])
    }

    pub fn new(config: &Configuration) -> AgResult<Self> {
        let params = Params::new("linear_regression", config);
        Ok(Self {
            alpha: params.float("alpha", 1e-6)?,
            fit_intercept: params.flag("fit_intercept", true)?,
            coefficients: None,
            intercept: 0.0,
        })
    }
}

impl Plugin for LinearRegression {
    fn name(&self) -> &str {
        "linear_regression"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Regression
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        Self::space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let x = &data.features;
        let y = &data.target;
        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x.mean_axis(Axis(0)).ok_or_else(|| fit_failed(self.name(), "empty input"))?;
            (x_mean, y.mean().unwrap_or(0.0))
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };
        let xc = x - &x_mean;
        let yc = y - y_mean;

        let mut gram = xc.t().dot(&xc);
        for i in 0..gram.nrows() {
            gram[[i, i]] += self.alpha;
        }
        let coefficients = cholesky_solve(&gram, &xc.t().dot(&yc))
            .ok_or_else(|| fit_failed(self.name(), "normal equations are singular"))?;

        self.intercept = y_mean - x_mean.dot(&coefficients);
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(coefficients.len(), x)?;
        Ok(x.dot(coefficients) + self.intercept)
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// K nearest neighbours
// ---------------------------------------------------------------------------

/// Averages the targets of the `n_neighbors` closest training rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNeighborsRegressor {
    n_neighbors: usize,
    weights: String,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
}

impl KNeighborsRegressor {
    pub fn space() -> SearchSpace {
        SearchSpace::new().add_int("n_neighbors", 1, 15).add_categorical(
            "weights",
            vec![serde_json::json!("uniform"), serde_json::json!("distance")],
        )
    }

    pub fn new(config: &Configuration) -> AgResult<Self> {
        let params = Params::new("kneighbors_regressor", config);
        Ok(Self {
            n_neighbors: params.count("n_neighbors", 5)?.max(1),
            weights: params.choice("weights", &["uniform", "distance"], "uniform")?,
            x_train: None,
            y_train: None,
        })
    }
}

impl Plugin for KNeighborsRegressor {
    fn name(&self) -> &str {
        "kneighbors_regressor"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Regression
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        Self::space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        self.x_train = Some(data.features.clone());
        self.y_train = Some(data.target.clone());
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(not_fitted(self.name())),
        };
        check_width(x_train.ncols(), x)?;
        let k = self.n_neighbors.min(x_train.nrows());
        let by_distance = self.weights == "distance";

        let predictions = x
            .axis_iter(Axis(0))
            .map(|row| {
                let mut neighbours: Vec<(f64, f64)> = x_train
                    .axis_iter(Axis(0))
                    .zip(y_train.iter())
                    .map(|(train, y)| ((&row - &train).mapv(|v| v * v).sum().sqrt(), *y))
                    .collect();
                neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
                let nearest = &neighbours[..k];
                if by_distance {
                    // An exact match takes the whole weight
                    if let Some((_, y)) = nearest.iter().find(|(d, _)| *d < 1e-12) {
                        return *y;
                    }
                    let (num, den) = nearest
                        .iter()
                        .fold((0.0, 0.0), |(num, den), (d, y)| (num + y / d, den + 1.0 / d));
                    num / den
                } else {
                    nearest.iter().map(|(_, y)| y).sum::<f64>() / k as f64
                }
            })
            .collect();
        Ok(predictions)
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_optimizer::ParameterValue;
    use ndarray::array;

    #[test]
    fn linear_regression_recovers_coefficients() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 5.0], [4.0, 2.0]];
        let y = x.column(0).mapv(|v| 2.0 * v) + &x.column(1).mapv(|v| -0.5 * v) + 3.0;
        let mut model = LinearRegression::new(&Configuration::new()).unwrap();
        model.fit(&Dataset::new(x.clone(), y.clone()).unwrap()).unwrap();
        let predicted = model.predict(&x).unwrap();
        for (p, t) in predicted.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-4, "{p} vs {t}");
        }
    }

    #[test]
    fn no_intercept_passes_through_origin() {
        let mut config = Configuration::new();
        config.insert("fit_intercept".into(), ParameterValue::Json(serde_json::json!(false)));
        let mut model = LinearRegression::new(&config).unwrap();
        model
            .fit(&Dataset::new(array![[1.0], [2.0]], array![2.0, 4.0]).unwrap())
            .unwrap();
        assert!(model.predict(&array![[0.0]]).unwrap()[0].abs() < 1e-9);
    }

    #[test]
    fn knn_averages_nearest_targets() {
        let mut config = Configuration::new();
        config.insert("n_neighbors".into(), ParameterValue::Int(2));
        let mut model = KNeighborsRegressor::new(&config).unwrap();
        let data = Dataset::new(array![[0.0], [1.0], [10.0]], array![1.0, 3.0, 100.0]).unwrap();
        model.fit(&data).unwrap();
        assert_eq!(model.predict(&array![[0.4]]).unwrap().to_vec(), vec![2.0]);
    }

    #[test]
    fn distance_weighting_prefers_exact_matches() {
        let mut config = Configuration::new();
        config.insert("weights".into(), ParameterValue::Json(serde_json::json!("distance")));
        let mut model = KNeighborsRegressor::new(&config).unwrap();
        let data = Dataset::new(array![[0.0], [1.0], [2.0]], array![5.0, 7.0, 9.0]).unwrap();
        model.fit(&data).unwrap();
        assert_eq!(model.predict(&array![[1.0]]).unwrap()[0], 7.0);
    }

    #[test]
    fn predict_before_fit_fails() {
        let model = KNeighborsRegressor::new(&Configuration::new()).unwrap();
        assert!(model.predict(&array![[1.0]]).is_err());
    }
}
