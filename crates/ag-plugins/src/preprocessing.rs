//! Feature scaling and imputation stages.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use ag_optimizer::{Configuration, SearchSpace};
use ag_types::{AgResult, Dataset};

use crate::plugin::{check_width, not_fitted, Params, Plugin, PluginCategory};
use crate::registry::PluginRegistry;

pub(crate) fn register(registry: &mut PluginRegistry) {
    registry
        .register(
            PluginCategory::FeatureScaling,
            ScalerKind::Standard.name(),
            ScalerKind::Standard.space(),
            |c| Ok(Box::new(Scaler::new(ScalerKind::Standard, c)?) as Box<dyn Plugin>),
            load_scaler,
        )
        .register(
            PluginCategory::FeatureScaling,
            ScalerKind::MinMax.name(),
            ScalerKind::MinMax.space(),
            |c| Ok(Box::new(Scaler::new(ScalerKind::MinMax, c)?) as Box<dyn Plugin>),
            load_scaler,
        )
        .register(
            PluginCategory::FeatureScaling,
            ScalerKind::MaxAbs.name(),
            ScalerKind::MaxAbs.space(),
            |c| Ok(Box::new(Scaler::new(ScalerKind::MaxAbs, c)?) as Box<dyn Plugin>),
            load_scaler,
        )
        .register(
            PluginCategory::Imputers,
            "mean",
            SearchSpace::new(),
            |_| Ok(Box::new(Imputer::new(ImputeStrategy::Mean)) as Box<dyn Plugin>),
            load_imputer,
        )
        .register(
            PluginCategory::Imputers,
            "median",
            SearchSpace::new(),
            |_| Ok(Box::new(Imputer::new(ImputeStrategy::Median)) as Box<dyn Plugin>),
            load_imputer,
        );
}

fn load_scaler(bytes: &[u8]) -> AgResult<Box<dyn Plugin>> {
    Ok(Box::new(serde_json::from_slice::<Scaler>(bytes)?))
}

fn load_imputer(bytes: &[u8]) -> AgResult<Box<dyn Plugin>> {
    Ok(Box::new(serde_json::from_slice::<Imputer>(bytes)?))
}

/// Finite values of a column, ignoring missing entries.
fn observed(column: ArrayView1<f64>) -> Vec<f64> {
    column.iter().copied().filter(|v| v.is_finite()).collect()
}

// ---------------------------------------------------------------------------
// Scalers
// ---------------------------------------------------------------------------

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalerKind {
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// Max absolute scaling: x / max(|x|)
    MaxAbs,
}

impl ScalerKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Standard => "scaler",
            Self::MinMax => "minmax_scaler",
            Self::MaxAbs => "maxabs_scaler",
        }
    }

    fn space(&self) -> SearchSpace {
        match self {
            Self::Standard => SearchSpace::new().add_categorical(
                "with_mean",
                vec![serde_json::json!(true), serde_json::json!(false)],
            ),
            Self::MinMax | Self::MaxAbs => SearchSpace::new(),
        }
    }
}

/// Column-wise affine scaler: `(x - offset) / scale`. Missing values pass through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    kind: ScalerKind,
    with_mean: bool,
    offset: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl Scaler {
    pub fn new(kind: ScalerKind, config: &Configuration) -> AgResult<Self> {
        let with_mean = Params::new(kind.name(), config).flag("with_mean", true)?;
        Ok(Self {
            kind,
            with_mean,
            offset: None,
            scale: None,
        })
    }

    fn column_params(&self, values: &[f64]) -> (f64, f64) {
        if values.is_empty() {
            return (0.0, 1.0);
        }
        let n = values.len() as f64;
        let (offset, scale) = match self.kind {
            ScalerKind::Standard => {
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (if self.with_mean { mean } else { 0.0 }, var.sqrt())
            }
            ScalerKind::MinMax => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (min, max - min)
            }
            ScalerKind::MaxAbs => (0.0, values.iter().map(|v| v.abs()).fold(0.0, f64::max)),
        };
        // Constant columns are left unscaled
        (offset, if scale > 1e-12 { scale } else { 1.0 })
    }
}

impl Plugin for Scaler {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::FeatureScaling
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        self.kind.space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let (offsets, scales): (Vec<f64>, Vec<f64>) = data
            .features
            .axis_iter(Axis(1))
            .map(|column| self.column_params(&observed(column)))
            .unzip();
        self.offset = Some(Array1::from(offsets));
        self.scale = Some(Array1::from(scales));
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let (offset, scale) = match (&self.offset, &self.scale) {
            (Some(o), Some(s)) => (o, s),
            _ => return Err(not_fitted(self.name())),
        };
        check_width(offset.len(), x)?;
        Ok((x - offset) / scale)
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

// ---------------------------------------------------------------------------
// Imputers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImputeStrategy {
    Mean,
    Median,
}

/// Replaces missing (NaN) entries with a per-column statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Imputer {
    strategy: ImputeStrategy,
    fill: Option<Array1<f64>>,
}

impl Imputer {
    pub fn new(strategy: ImputeStrategy) -> Self {
        Self { strategy, fill: None }
    }

    fn statistic(&self, mut values: Vec<f64>) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self.strategy {
            ImputeStrategy::Mean => values.iter().sum::<f64>() / values.len() as f64,
            ImputeStrategy::Median => {
                values.sort_by(|a, b| a.total_cmp(b));
                let mid = values.len() / 2;
                if values.len() % 2 == 0 {
                    (values[mid - 1] + values[mid]) / 2.0
                } else {
                    values[mid]
                }
            }
        }
    }
}

impl Plugin for Imputer {
    fn name(&self) -> &str {
        match self.strategy {
            ImputeStrategy::Mean => "mean",
            ImputeStrategy::Median => "median",
        }
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Imputers
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        SearchSpace::new()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let fill: Array1<f64> = data
            .features
            .axis_iter(Axis(1))
            .map(|column| self.statistic(observed(column)))
            .collect();
        self.fill = Some(fill);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> AgResult<Array2<f64>> {
        let fill = self.fill.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(fill.len(), x)?;
        let mut out = x.clone();
        for (mut column, value) in out.axis_iter_mut(Axis(1)).zip(fill.iter()) {
            column.mapv_inplace(|v| if v.is_nan() { *value } else { v });
        }
        Ok(out)
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}
