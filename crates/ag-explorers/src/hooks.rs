//! Cancellation hooks polled by a running search.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Answer to a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookSignal {
    Continue,
    Stop,
}

/// Progress notifications passed to [`CancellationHook::heartbeat`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchEvent {
    StudyStarted {
        study: String,
        shapes: usize,
    },
    TrialFinished {
        study: String,
        shape: String,
        trial_number: usize,
        budget: f64,
        #[serde(with = "ag_types::non_finite")]
        score: f64,
        failed: bool,
    },
    EnsembleProposal {
        study: String,
        iteration: usize,
        #[serde(with = "ag_types::non_finite")]
        score: f64,
        accepted: bool,
    },
    StudyFinished {
        study: String,
        pool_size: usize,
    },
}

/// Externally supplied stop switch.
///
/// `poll` is called before every trial, before every cross-validation fold
/// and before every ensemble weight proposal. Once it answers
/// [`HookSignal::Stop`] the search ends with a cancellation error.
pub trait CancellationHook: Send + Sync {
    fn poll(&self) -> HookSignal;

    fn heartbeat(&self, _event: &SearchEvent) {}
}

/// Never stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl CancellationHook for NoopHook {
    fn poll(&self) -> HookSignal {
        HookSignal::Continue
    }
}

/// Stops once its shared flag is raised, e.g. from another thread.
#[derive(Debug, Clone, Default)]
pub struct FlagHook {
    flag: Arc<AtomicBool>,
}

impl FlagHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared flag; storing `true` cancels the search.
    pub fn handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl CancellationHook for FlagHook {
    fn poll(&self) -> HookSignal {
        if self.is_cancelled() {
            HookSignal::Stop
        } else {
            HookSignal::Continue
        }
    }
}
