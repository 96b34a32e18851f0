//! # ag-optimizer
//!
//! Hyperparameter search for Augur.
//!
//! Provides search space definitions, search strategies (random, Bayesian
//! with a Gaussian-process surrogate, Hyperband) behind one [`Optimizer`]
//! trait, and trial tracking records.

mod gp;
mod hyperband;
mod search;
mod trial;

pub use ag_types::ObjectiveDirection;
pub use hyperband::HyperbandSearch;
pub use search::{
    configuration_key, BayesianSearch, Configuration, Optimizer, OptimizerType, ParameterDef,
    ParameterKind, ParameterValue, RandomSearch, SearchSpace, Suggestion,
};
pub use trial::{StudyId, StudyState, StudyStatus, Trial, TrialScore, TrialStatus};
