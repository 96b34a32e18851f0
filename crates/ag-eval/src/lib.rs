//! # ag-eval
//!
//! Scoring for Augur: metric functions for every task family, fold planning
//! (k-fold, stratified, group-aware, holdout) and the cross-validating
//! [`Evaluator`].

mod evaluator;
mod folds;
mod metrics;

pub use evaluator::{default_horizon, Evaluator, OutOfFold, Score};
pub use folds::{Fold, FoldPlan, FoldStrategy, HOLDOUT_FRACTION};
pub use metrics::{
    evaluate_auc, evaluate_brier_score, evaluate_c_index, generate_score, mae, print_score, r2,
    rmse,
};
