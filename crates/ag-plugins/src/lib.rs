//! # ag-plugins
//!
//! Pipeline stages for Augur: the [`Plugin`] capability trait, the
//! name-to-factory [`PluginRegistry`], built-in preprocessing and estimator
//! plugins, [`Pipeline`] composition and [`WeightedEnsemble`].

mod classifiers;
mod ensemble;
mod model;
mod pipeline;
mod plugin;
mod preprocessing;
mod registry;
mod regression;
mod survival;

pub use classifiers::{LogisticRegression, NearestCentroid, Perceptron};
pub use ensemble::{weighted_average, WeightedEnsemble};
pub use model::Model;
pub use pipeline::{Pipeline, PipelineShape, StageRef};
pub use plugin::{Plugin, PluginCategory};
pub use preprocessing::{ImputeStrategy, Imputer, Scaler, ScalerKind};
pub use registry::{PluginEntry, PluginFactory, PluginLoader, PluginRegistry};
pub use regression::{KNeighborsRegressor, LinearRegression};
pub use survival::CoxPh;
