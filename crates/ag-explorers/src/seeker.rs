//! The search loop: optimizer proposals, cross-validated evaluation and
//! ranking over every candidate pipeline shape.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use ag_eval::Evaluator;
use ag_optimizer::{StudyStatus, Suggestion, Trial, TrialScore};
use ag_plugins::{Model, Pipeline, PipelineShape, PluginCategory, PluginRegistry, StageRef};
use ag_types::{AgError, AgResult, Dataset, Metric, TaskFamily, TrialError};

use crate::config::StudyConfig;
use crate::hooks::{CancellationHook, HookSignal, SearchEvent};
use crate::pool::{RankedPool, TrialResult};

/// Everything a search produced.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    /// Best results, best first, each with a pipeline fitted on the full dataset.
    pub pool: Vec<TrialResult>,
    /// Every trial run, failures included, in execution order.
    pub trials: Vec<Trial>,
    pub status: StudyStatus,
    /// True when the wall-clock budget ended the search.
    pub timed_out: bool,
}

impl SearchReport {
    pub fn pipelines(&self) -> Vec<Pipeline> {
        self.pool.iter().map(|r| r.pipeline.clone()).collect()
    }

    pub fn into_pipelines(self) -> Vec<Pipeline> {
        self.pool.into_iter().map(|r| r.pipeline).collect()
    }
}

/// Mutable state of one `search` call.
struct SearchRun<'a> {
    data: &'a Dataset,
    evaluator: Evaluator,
    pool: RankedPool,
    trials: Vec<Trial>,
    started: Instant,
}

/// Searches preprocessing × estimator combinations for one task family and
/// returns the `top_k` best pipelines.
pub struct Seeker {
    task: TaskFamily,
    config: StudyConfig,
    metric: Metric,
    registry: Arc<PluginRegistry>,
    hooks: Vec<Arc<dyn CancellationHook>>,
    status: Arc<RwLock<StudyStatus>>,
}

impl Seeker {
    /// Validate `config` against `registry`; configuration errors surface here,
    /// before any search work.
    pub fn new(task: TaskFamily, config: StudyConfig, registry: PluginRegistry) -> AgResult<Self> {
        config.validate(task, &registry)?;
        let metric = config.metric_for(task);
        let status = StudyStatus::new(config.study_name.clone(), metric);
        info!(
            "Created {} seeker '{}' optimizing {}",
            task, config.study_name, metric
        );
        Ok(Self {
            task,
            config,
            metric,
            registry: Arc::new(registry),
            hooks: Vec::new(),
            status: Arc::new(RwLock::new(status)),
        })
    }

    pub fn classifier(config: StudyConfig) -> AgResult<Self> {
        Self::new(TaskFamily::Classification, config, PluginRegistry::with_defaults())
    }

    pub fn regression(config: StudyConfig) -> AgResult<Self> {
        Self::new(TaskFamily::Regression, config, PluginRegistry::with_defaults())
    }

    pub fn survival(config: StudyConfig) -> AgResult<Self> {
        Self::new(TaskFamily::Survival, config, PluginRegistry::with_defaults())
    }

    /// Add a hook; every hook is polled and any one can stop the search.
    pub fn with_hooks(mut self, hook: Arc<dyn CancellationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn task(&self) -> TaskFamily {
        self.task
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub(crate) fn hooks(&self) -> &[Arc<dyn CancellationHook>] {
        &self.hooks
    }

    /// Snapshot of the current (or last) study's progress.
    pub fn status(&self) -> StudyStatus {
        self.status.read().clone()
    }

    /// Shared status, readable from other threads while a search runs.
    pub fn status_handle(&self) -> Arc<RwLock<StudyStatus>> {
        Arc::clone(&self.status)
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.hooks.iter().any(|h| h.poll() == HookSignal::Stop)
    }

    pub(crate) fn emit(&self, event: SearchEvent) {
        for hook in &self.hooks {
            hook.heartbeat(&event);
        }
    }

    fn cancelled(&self) -> AgError {
        self.status.write().mark_cancelled();
        warn!("Study '{}' cancelled by hook", self.config.study_name);
        AgError::Cancelled {
            study: self.config.study_name.clone(),
        }
    }

    /// The evaluator every trial of this study is scored with.
    pub(crate) fn evaluator(&self, data: &Dataset) -> AgResult<Evaluator> {
        let evaluator = Evaluator::new(self.task, self.metric, data, self.config.cv, self.config.random_state)?
            .with_study_name(self.config.study_name.clone());
        Ok(match self.config.time_horizon {
            Some(horizon) => evaluator.with_horizon(horizon),
            None => evaluator,
        })
    }

    /// Every imputer × scaler × estimator combination, in configuration order.
    pub fn candidate_shapes(&self) -> AgResult<Vec<PipelineShape>> {
        let options = |category: PluginCategory, names: &[String]| -> Vec<Option<StageRef>> {
            if names.is_empty() {
                vec![None]
            } else {
                names.iter().map(|n| Some(StageRef::new(category, n.clone()))).collect()
            }
        };
        let imputers = options(PluginCategory::Imputers, &self.config.imputers);
        let scalers = options(PluginCategory::FeatureScaling, &self.config.feature_scaling);
        let estimator_category = PluginCategory::for_task(self.task);

        let mut shapes = Vec::new();
        for estimator in self.config.estimators_for(self.task, &self.registry) {
            for imputer in &imputers {
                for scaler in &scalers {
                    let stages = imputer.iter().chain(scaler.iter()).cloned().collect();
                    shapes.push(PipelineShape::new(stages, StageRef::new(estimator_category, estimator.clone()))?);
                }
            }
        }
        Ok(shapes)
    }

    /// Run the search and return the best pipelines, fitted on `data`.
    pub fn search(&self, data: &Dataset) -> AgResult<Vec<Pipeline>> {
        Ok(self.search_report(data)?.into_pipelines())
    }

    /// Run the search and return the ranked pool with the full trial history.
    pub fn search_report(&self, data: &Dataset) -> AgResult<SearchReport> {
        data.validate_for(self.task)?;
        if data.has_missing() && self.config.imputers.is_empty() {
            warn!(
                "Study '{}': features contain missing values but no imputer is configured",
                self.config.study_name
            );
        }
        let shapes = self.candidate_shapes()?;
        let evaluator = self.evaluator(data)?;

        {
            let mut status = self.status.write();
            *status = StudyStatus::new(self.config.study_name.clone(), self.metric);
            status.mark_running();
        }
        info!(
            "Starting study '{}': {} shapes x {} trials, {:?} folds, metric {}",
            self.config.study_name,
            shapes.len(),
            self.config.num_iter,
            evaluator.plan().strategy(),
            self.metric
        );
        self.emit(SearchEvent::StudyStarted {
            study: self.config.study_name.clone(),
            shapes: shapes.len(),
        });

        let mut run = SearchRun {
            data,
            evaluator,
            pool: RankedPool::new(self.metric, self.config.top_k),
            trials: Vec::new(),
            started: Instant::now(),
        };

        let outcome = self.run_shapes(&mut run, &shapes);
        let timed_out = match outcome {
            Ok(timed_out) => timed_out,
            Err(e) => {
                if !e.is_cancelled() {
                    self.status.write().mark_failed(e.to_string());
                }
                return Err(e);
            }
        };

        if run.pool.is_empty() && !run.trials.is_empty() {
            let e: AgError = TrialError::NoUsableScore {
                shape: shapes.iter().map(|s| s.name()).collect::<Vec<_>>().join(", "),
            }
            .into();
            self.status.write().mark_failed(e.to_string());
            return Err(e);
        }

        let pool = self.fit_pool(run.pool, data)?;
        self.status.write().mark_completed();
        let status = self.status();
        info!(
            "Study '{}' finished: {} trials ({} failed), best {:?}",
            self.config.study_name,
            run.trials.len(),
            status.trials_failed,
            status.best_trial.as_ref().map(|b| b.score)
        );
        self.emit(SearchEvent::StudyFinished {
            study: self.config.study_name.clone(),
            pool_size: pool.len(),
        });
        Ok(SearchReport {
            pool,
            trials: run.trials,
            status,
            timed_out,
        })
    }

    fn timed_out(&self, run: &SearchRun<'_>) -> bool {
        self.config
            .timeout_duration()
            .is_some_and(|limit| run.started.elapsed() >= limit)
    }

    /// Returns whether the wall-clock budget ran out.
    fn run_shapes(&self, run: &mut SearchRun<'_>, shapes: &[PipelineShape]) -> AgResult<bool> {
        for (index, shape) in shapes.iter().enumerate() {
            let space = shape.search_space(&self.registry)?;
            space.validate()?;
            let mut optimizer = self
                .config
                .optimizer_type
                .build(space, self.config.random_state.wrapping_add(index as u64));
            debug!(shape = %shape, optimizer = optimizer.name(), "searching shape");

            let mut full_budget_tried = false;
            for _ in 0..self.config.num_iter {
                if self.should_stop() {
                    return Err(self.cancelled());
                }
                if self.timed_out(run) {
                    info!("Study '{}' reached its timeout", self.config.study_name);
                    return Ok(true);
                }
                let Some(suggestion) = optimizer.suggest() else {
                    break;
                };
                full_budget_tried |= suggestion.is_full_budget();
                let objective = self.run_trial(run, shape, &suggestion)?;
                optimizer.observe(&suggestion, objective);
            }

            // Partial-fidelity schedules may end before any full evaluation.
            if !full_budget_tried {
                if let Some(config) = optimizer.incumbent() {
                    if self.should_stop() {
                        return Err(self.cancelled());
                    }
                    if self.timed_out(run) {
                        return Ok(true);
                    }
                    let suggestion = Suggestion::full(config);
                    let objective = self.run_trial(run, shape, &suggestion)?;
                    optimizer.observe(&suggestion, objective);
                }
            }
        }
        Ok(false)
    }

    /// Evaluate one suggestion, record it, and return the objective for the
    /// optimizer. Failures become the metric's worst score unless strict.
    fn run_trial(&self, run: &mut SearchRun<'_>, shape: &PipelineShape, suggestion: &Suggestion) -> AgResult<f64> {
        let study_id = self.status.read().id;
        let trial_number = run.trials.len();
        let mut trial = Trial::new(
            study_id,
            trial_number,
            shape.name(),
            suggestion.config.clone(),
            suggestion.budget,
        );
        trial.mark_running();

        let stop = || self.should_stop();
        let outcome = shape
            .instantiate(&self.registry, &suggestion.config)
            .and_then(|pipeline| {
                let score = run.evaluator.evaluate(&pipeline, run.data, suggestion.budget, &stop)?;
                if !score.mean.is_finite() {
                    return Err(AgError::Scoring(format!("non-finite score {}", score.mean)));
                }
                Ok((pipeline, score))
            });

        let objective = match outcome {
            Ok((pipeline, score)) => {
                let result = TrialScore::new(
                    trial.id,
                    self.metric,
                    score.mean,
                    score.std_err,
                    score.fold_scores.clone(),
                );
                let objective = result.objective;
                trial.mark_completed(result);
                if suggestion.is_full_budget() {
                    run.pool.offer(TrialResult {
                        trial_id: trial.id,
                        trial_number,
                        shape: shape.clone(),
                        config: suggestion.config.clone(),
                        score: score.mean,
                        std_err: score.std_err,
                        fold_scores: score.fold_scores,
                        pipeline,
                    });
                }
                debug!(
                    shape = %shape,
                    trial = trial_number,
                    budget = suggestion.budget,
                    score = %score_text(self.metric, &trial),
                    "trial completed"
                );
                objective
            }
            Err(e) if e.is_cancelled() => return Err(self.cancelled()),
            Err(e) if self.config.strict => {
                error!("Trial {} of {} failed in strict mode: {}", trial_number, shape, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Trial {} of {} failed, scoring it as worst: {}", trial_number, shape, e);
                let worst = TrialScore::worst(trial.id, self.metric);
                let objective = worst.objective;
                trial.mark_failed(e.to_string(), worst);
                objective
            }
        };

        self.status.write().record(&trial);
        self.emit(SearchEvent::TrialFinished {
            study: self.config.study_name.clone(),
            shape: shape.name(),
            trial_number,
            budget: suggestion.budget,
            score: trial.result.as_ref().map(|r| r.score).unwrap_or(f64::NAN),
            failed: trial.error.is_some(),
        });
        run.trials.push(trial);
        Ok(objective)
    }

    /// Fit every pool member on the whole dataset. A member that fails to fit
    /// is dropped, or aborts the search in strict mode.
    fn fit_pool(&self, pool: RankedPool, data: &Dataset) -> AgResult<Vec<TrialResult>> {
        let mut fitted = Vec::with_capacity(pool.len());
        for mut entry in pool.into_entries() {
            match entry.pipeline.fit(data) {
                Ok(()) => fitted.push(entry),
                Err(e) if self.config.strict => return Err(e),
                Err(e) => warn!("Dropping {} from the pool, final fit failed: {}", entry.shape, e),
            }
        }
        Ok(fitted)
    }
}

fn score_text(metric: Metric, trial: &Trial) -> String {
    match &trial.result {
        Some(result) => format!("{}={}", metric, ag_eval::print_score((result.score, result.std_err))),
        None => "none".to_string(),
    }
}
