//! # ag-explorers
//!
//! The AutoML search layer of Augur.
//!
//! A [`Seeker`] crosses the configured imputers, scalers and estimators into
//! pipeline shapes, tunes each shape with the study's optimizer, scores every
//! trial with cross-validation and keeps the best `top_k` results in a
//! [`RankedPool`]. An [`EnsembleSeeker`] then searches convex weights over
//! that pool.

mod config;
mod ensemble;
mod hooks;
mod pool;
mod seeker;

pub use config::{StudyConfig, WeightSearch, RANDOM_STATE_ENV};
pub use ensemble::EnsembleSeeker;
pub use hooks::{CancellationHook, FlagHook, HookSignal, NoopHook, SearchEvent};
pub use pool::{RankedPool, TrialResult};
pub use seeker::{SearchReport, Seeker};
