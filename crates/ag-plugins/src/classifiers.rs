//! Built-in classifiers.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use ag_optimizer::{Configuration, SearchSpace};
use ag_types::{AgResult, Dataset};

use crate::plugin::{check_width, fit_failed, not_fitted, Params, Plugin, PluginCategory};
use crate::registry::PluginRegistry;

pub(crate) fn register(registry: &mut PluginRegistry) {
    registry
        .register(
            PluginCategory::Classifiers,
            "logistic_regression",
            LogisticRegression::space(),
            |c| Ok(Box::new(LogisticRegression::new(c)?) as Box<dyn Plugin>),
            |b| Ok(Box::new(serde_json::from_slice::<LogisticRegression>(b)?) as Box<dyn Plugin>),
        )
        .register(
            PluginCategory::Classifiers,
            "perceptron",
            Perceptron::space(),
            |c| Ok(Box::new(Perceptron::new(c)?) as Box<dyn Plugin>),
            |b| Ok(Box::new(serde_json::from_slice::<Perceptron>(b)?) as Box<dyn Plugin>),
        )
        .register(
            PluginCategory::Classifiers,
            "nearest_centroid",
            NearestCentroid::space(),
            |c| Ok(Box::new(NearestCentroid::new(c)?) as Box<dyn Plugin>),
            |b| Ok(Box::new(serde_json::from_slice::<NearestCentroid>(b)?) as Box<dyn Plugin>),
        );
}

/// Sorted labels and each row's index into them. Fails on fewer than two classes.
fn encode_labels(name: &str, data: &Dataset) -> AgResult<(Vec<f64>, Vec<usize>)> {
    let classes = data.classes();
    if classes.len() < 2 {
        return Err(fit_failed(name, "need at least two classes"));
    }
    let indices = data
        .target
        .iter()
        .map(|y| classes.partition_point(|c| c.total_cmp(y).is_lt()))
        .collect();
    Ok((classes, indices))
}

/// Row-wise softmax, shifted by the row maximum for stability.
fn softmax_rows(mut scores: Array2<f64>) -> Array2<f64> {
    for mut row in scores.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|s| (s - max).exp());
        let total = row.sum();
        row.mapv_inplace(|s| s / total);
    }
    scores
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Label of the most probable class in each row.
pub(crate) fn argmax_labels(proba: &Array2<f64>, classes: &[f64]) -> Array1<f64> {
    proba
        .axis_iter(Axis(0))
        .map(|row| {
            let best = row
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (i, p)| if *p > acc.1 { (i, *p) } else { acc });
            classes[best.0]
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

/// Multinomial logistic regression fitted by full-batch gradient descent
/// with an L2 penalty of strength `1 / C`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    c: f64,
    max_iter: usize,
    learning_rate: f64,
    classes: Vec<f64>,
    weights: Option<Array2<f64>>,
    bias: Option<Array1<f64>>,
}

impl LogisticRegression {
    pub fn space() -> SearchSpace {
        SearchSpace::new()
            .add_log_uniform("C", 1e-2, 1e2)
            .add_int("max_iter", 50, 300)
            .add_log_uniform("learning_rate", 1e-2, 1.0)
    }

    pub fn new(config: &Configuration) -> AgResult<Self> {
        let params = Params::new("logistic_regression", config);
        Ok(Self {
            c: params.float("C", 1.0)?,
            max_iter: params.count("max_iter", 100)?,
            learning_rate: params.float("learning_rate", 0.1)?,
            classes: Vec::new(),
            weights: None,
            bias: None,
        })
    }
}

impl Plugin for LogisticRegression {
    fn name(&self) -> &str {
        "logistic_regression"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Classifiers
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        Self::space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let (classes, labels) = encode_labels(self.name(), data)?;
        let x = &data.features;
        let (n, d) = x.dim();
        let k = classes.len();

        let mut onehot = Array2::<f64>::zeros((n, k));
        for (i, label) in labels.iter().enumerate() {
            onehot[[i, *label]] = 1.0;
        }

        let mut weights = Array2::<f64>::zeros((d, k));
        let mut bias = Array1::<f64>::zeros(k);
        let penalty = 1.0 / (self.c * n as f64);
        for _ in 0..self.max_iter {
            let proba = softmax_rows(x.dot(&weights) + &bias);
            let residual = proba - &onehot;
            let grad_w = x.t().dot(&residual) / n as f64 + &weights * penalty;
            let grad_b = residual.sum_axis(Axis(0)) / n as f64;
            weights = weights - grad_w * self.learning_rate;
            bias = bias - grad_b * self.learning_rate;
        }

        self.classes = classes;
        self.weights = Some(weights);
        self.bias = Some(bias);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let (weights, bias) = match (&self.weights, &self.bias) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(not_fitted(self.name())),
        };
        check_width(weights.nrows(), x)?;
        Ok(softmax_rows(x.dot(weights) + bias))
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        Ok(argmax_labels(&self.predict_proba(x)?, &self.classes))
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Perceptron
// ---------------------------------------------------------------------------

/// Perceptron, one-vs-rest for more than two classes. Probabilities are the
/// logistic (binary) or softmax (multiclass) squashing of the decision values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perceptron {
    max_iter: usize,
    eta0: f64,
    penalty: String,
    alpha: f64,
    classes: Vec<f64>,
    /// One column per decision function (a single column for binary problems).
    weights: Option<Array2<f64>>,
    bias: Option<Array1<f64>>,
}

impl Perceptron {
    pub fn space() -> SearchSpace {
        SearchSpace::new()
            .add_int("max_iter", 5, 50)
            .add_log_uniform("eta0", 1e-3, 1.0)
            .add_categorical("penalty", vec![serde_json::json!("none"), serde_json::json!("l2")])
            .add_log_uniform("alpha", 1e-5, 1e-2)
    }

    pub fn new(config: &Configuration) -> AgResult<Self> {
        let params = Params::new("perceptron", config);
        Ok(Self {
            max_iter: params.count("max_iter", 20)?,
            eta0: params.float("eta0", 1.0)?,
            penalty: params.choice("penalty", &["none", "l2"], "none")?,
            alpha: params.float("alpha", 1e-4)?,
            classes: Vec::new(),
            weights: None,
            bias: None,
        })
    }

    fn decision(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let (weights, bias) = match (&self.weights, &self.bias) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(not_fitted(self.name())),
        };
        check_width(weights.nrows(), x)?;
        Ok(x.dot(weights) + bias)
    }
}

impl Plugin for Perceptron {
    fn name(&self) -> &str {
        "perceptron"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Classifiers
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        Self::space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let (classes, labels) = encode_labels(self.name(), data)?;
        let x = &data.features;
        let d = x.ncols();
        // Binary problems learn one decision function for the second class.
        let outputs = if classes.len() == 2 { 1 } else { classes.len() };
        let positive = |label: usize, j: usize| if outputs == 1 { label == 1 } else { label == j };
        let decay = if self.penalty == "l2" { 1.0 - self.eta0 * self.alpha } else { 1.0 };

        let mut weights = Array2::<f64>::zeros((d, outputs));
        let mut bias = Array1::<f64>::zeros(outputs);
        for _ in 0..self.max_iter {
            let mut mistakes = 0;
            for (row, label) in x.axis_iter(Axis(0)).zip(labels.iter()) {
                for j in 0..outputs {
                    let target = if positive(*label, j) { 1.0 } else { -1.0 };
                    let mut column = weights.column_mut(j);
                    let margin = target * (row.dot(&column) + bias[j]);
                    column.mapv_inplace(|w| w * decay);
                    if margin <= 0.0 {
                        column.scaled_add(self.eta0 * target, &row);
                        bias[j] += self.eta0 * target;
                        mistakes += 1;
                    }
                }
            }
            if mistakes == 0 {
                break;
            }
        }

        self.classes = classes;
        self.weights = Some(weights);
        self.bias = Some(bias);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let decision = self.decision(x)?;
        if decision.ncols() == 1 {
            let mut proba = Array2::<f64>::zeros((x.nrows(), 2));
            for (i, z) in decision.column(0).iter().enumerate() {
                let p = sigmoid(*z);
                proba[[i, 0]] = 1.0 - p;
                proba[[i, 1]] = p;
            }
            Ok(proba)
        } else {
            Ok(softmax_rows(decision))
        }
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        Ok(argmax_labels(&self.predict_proba(x)?, &self.classes))
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Nearest centroid
// ---------------------------------------------------------------------------

/// Assigns each row to the class with the closest mean. Probabilities are a
/// softmax over negative distances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearestCentroid {
    metric: String,
    classes: Vec<f64>,
    centroids: Option<Array2<f64>>,
}

impl NearestCentroid {
    pub fn space() -> SearchSpace {
        SearchSpace::new().add_categorical(
            "metric",
            vec![serde_json::json!("euclidean"), serde_json::json!("manhattan")],
        )
    }

    pub fn new(config: &Configuration) -> AgResult<Self> {
        let metric = Params::new("nearest_centroid", config).choice(
            "metric",
            &["euclidean", "manhattan"],
            "euclidean",
        )?;
        Ok(Self {
            metric,
            classes: Vec::new(),
            centroids: None,
        })
    }
}

impl Plugin for NearestCentroid {
    fn name(&self) -> &str {
        "nearest_centroid"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Classifiers
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        Self::space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let (classes, labels) = encode_labels(self.name(), data)?;
        let mut centroids = Array2::<f64>::zeros((classes.len(), data.n_features()));
        let mut counts = vec![0usize; classes.len()];
        for (row, label) in data.features.axis_iter(Axis(0)).zip(labels.iter()) {
            let mut centroid = centroids.row_mut(*label);
            centroid += &row;
            counts[*label] += 1;
        }
        for (mut centroid, count) in centroids.axis_iter_mut(Axis(0)).zip(counts) {
            centroid /= count as f64;
        }
        self.classes = classes;
        self.centroids = Some(centroids);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let centroids = self.centroids.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(centroids.ncols(), x)?;
        let manhattan = self.metric == "manhattan";
        let neg_distance = Array2::from_shape_fn((x.nrows(), centroids.nrows()), |(i, k)| {
            let diff = &x.row(i) - &centroids.row(k);
            if manhattan {
                -diff.mapv(f64::abs).sum()
            } else {
                -diff.mapv(|v| v * v).sum().sqrt()
            }
        });
        Ok(softmax_rows(neg_distance))
    }

    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        Ok(argmax_labels(&self.predict_proba(x)?, &self.classes))
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}
