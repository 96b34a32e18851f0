//! Gaussian-process surrogate used by [`BayesianSearch`](crate::BayesianSearch).
//!
//! Inputs live in the unit cube produced by [`SearchSpace::encode`](crate::SearchSpace::encode);
//! outputs are standardized before fitting. The kernel is Matérn 5/2 with ARD
//! lengthscales set from the per-dimension spread of the observed points.

use nalgebra::{linalg::Cholesky, DMatrix, DVector, Dyn};

/// Most recent observations kept when fitting (fitting is O(n³)).
const MAX_TRAINING_POINTS: usize = 100;

/// Exploration margin for expected improvement, in standardized units.
const EI_XI: f64 = 0.01;

pub(crate) struct GaussianProcess {
    cholesky: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    x_train: Vec<Vec<f64>>,
    lengthscales: Vec<f64>,
    best: f64,
}

impl GaussianProcess {
    /// Fit to `(x, y)` pairs. Returns `None` when there is nothing to fit or the
    /// kernel matrix is not positive definite.
    pub(crate) fn fit(x: &[Vec<f64>], y: &[f64], noise_var: f64) -> Option<Self> {
        if x.is_empty() || x.len() != y.len() {
            return None;
        }
        let start = x.len().saturating_sub(MAX_TRAINING_POINTS);
        let x_train = x[start..].to_vec();
        let y_train = &y[start..];
        let n = y_train.len();

        let y_mean = y_train.iter().sum::<f64>() / n as f64;
        let y_var = if n > 1 {
            y_train.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            1.0
        };
        let y_std = y_var.sqrt().max(1e-10);
        let standardized: Vec<f64> = y_train.iter().map(|v| (v - y_mean) / y_std).collect();
        let best = standardized
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);

        let dims = x_train[0].len();
        let lengthscales: Vec<f64> = (0..dims)
            .map(|j| {
                let mean = x_train.iter().map(|p| p[j]).sum::<f64>() / n as f64;
                let var = x_train.iter().map(|p| (p[j] - mean).powi(2)).sum::<f64>() / n as f64;
                var.sqrt().max(0.05)
            })
            .collect();

        let kernel = DMatrix::from_fn(n, n, |i, j| {
            let k = matern52(&x_train[i], &x_train[j], &lengthscales);
            if i == j {
                k + noise_var
            } else {
                k
            }
        });
        let cholesky = Cholesky::new(kernel)?;
        let alpha = cholesky.solve(&DVector::from_column_slice(&standardized));

        Some(Self {
            cholesky,
            alpha,
            x_train,
            lengthscales,
            best,
        })
    }

    /// Posterior mean and standard deviation, in standardized units.
    pub(crate) fn predict(&self, x: &[f64]) -> (f64, f64) {
        let k_star = DVector::from_fn(self.x_train.len(), |i, _| {
            matern52(x, &self.x_train[i], &self.lengthscales)
        });
        let mean = k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let var = (1.0 - k_star.dot(&v)).max(0.0);
        (mean, var.sqrt())
    }

    /// Expected improvement over the best observation (maximization).
    pub(crate) fn expected_improvement(&self, x: &[f64]) -> f64 {
        let (mean, std) = self.predict(x);
        let gain = mean - self.best - EI_XI;
        if std < 1e-12 {
            return gain.max(0.0);
        }
        let z = gain / std;
        (gain * norm_cdf(z) + std * norm_pdf(z)).max(0.0)
    }
}

fn matern52(a: &[f64], b: &[f64], lengthscales: &[f64]) -> f64 {
    let r_sq: f64 = a
        .iter()
        .zip(b)
        .zip(lengthscales)
        .map(|((x, y), l)| ((x - y) / l).powi(2))
        .sum();
    let sqrt5_r = 5f64.sqrt() * r_sq.sqrt();
    (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
}

fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF (Zelen & Severo polynomial approximation).
fn norm_cdf(x: f64) -> f64 {
    if x < -8.0 {
        return 0.0;
    }
    if x > 8.0 {
        return 1.0;
    }
    let t = 1.0 / (1.0 + 0.231_641_9 * x.abs());
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let upper = 1.0 - norm_pdf(x.abs()) * poly;
    if x >= 0.0 {
        upper
    } else {
        1.0 - upper
    }
}
