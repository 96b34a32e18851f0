//! Search space definitions and hyperparameter search strategies.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use ag_types::{AgError, AgResult};

use crate::gp::GaussianProcess;
use crate::hyperband::HyperbandSearch;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name (e.g. "max_iter" or, once composed into a pipeline,
    /// "logistic_regression.max_iter").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Categorical { values: Vec<serde_json::Value> },
}

/// A concrete parameter value produced by a search strategy.
///
/// `Int` is tried before `Float` so integers survive a JSON round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Json(v) => v.as_f64(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Float(_) => None,
            Self::Json(v) => v.as_i64(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(v) => v.as_str(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Json(serde_json::Value::Bool(b)) => Some(*b),
            other => other.as_i64().map(|v| v != 0),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// One sampled point of a search space, keyed by parameter name.
///
/// Ordered so that configurations print, hash and serialize identically
/// across runs.
pub type Configuration = BTreeMap<String, ParameterValue>;

/// Canonical text form of a configuration, used for deduplication.
pub fn configuration_key(config: &Configuration) -> String {
    config
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(";")
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_categorical(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Categorical { values },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Copy of this space with every parameter renamed to `"{prefix}.{name}"`.
    pub fn prefixed(&self, prefix: &str) -> SearchSpace {
        SearchSpace {
            parameters: self
                .parameters
                .iter()
                .map(|p| ParameterDef {
                    name: format!("{prefix}.{}", p.name),
                    kind: p.kind.clone(),
                })
                .collect(),
        }
    }

    /// Concatenate another space after this one.
    pub fn extend(mut self, other: SearchSpace) -> Self {
        self.parameters.extend(other.parameters);
        self
    }

    /// Reject empty categorical sets, inverted bounds and non-positive log bounds.
    pub fn validate(&self) -> AgResult<()> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(AgError::Config(format!(
                    "duplicate hyperparameter name: {}",
                    param.name
                )));
            }
            let valid = match &param.kind {
                ParameterKind::FloatRange { low, high } => low.is_finite() && high.is_finite() && low <= high,
                ParameterKind::IntRange { low, high } => low <= high,
                ParameterKind::LogUniform { low, high } => *low > 0.0 && low <= high && high.is_finite(),
                ParameterKind::Categorical { values } => !values.is_empty(),
            };
            if !valid {
                return Err(AgError::Config(format!(
                    "invalid range for hyperparameter {}: {:?}",
                    param.name, param.kind
                )));
            }
        }
        Ok(())
    }

    /// Draw one configuration uniformly (log-uniformly for log ranges).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Configuration {
        self.parameters
            .iter()
            .map(|param| (param.name.clone(), sample_param(&param.kind, rng)))
            .collect()
    }

    /// Number of coordinates produced by [`SearchSpace::encode`].
    pub fn encoded_len(&self) -> usize {
        self.parameters
            .iter()
            .map(|p| match &p.kind {
                ParameterKind::Categorical { values } => values.len(),
                _ => 1,
            })
            .sum()
    }

    /// Map a configuration into the unit cube: numeric ranges are normalized,
    /// categoricals are one-hot encoded. Missing values encode to the midpoint.
    pub fn encode(&self, config: &Configuration) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for param in &self.parameters {
            let value = config.get(&param.name);
            match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    out.push(normalize(value.and_then(|v| v.as_f64()), *low, *high));
                }
                ParameterKind::IntRange { low, high } => {
                    out.push(normalize(value.and_then(|v| v.as_f64()), *low as f64, *high as f64));
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_value = value.and_then(|v| v.as_f64()).map(f64::ln);
                    out.push(normalize(log_value, low.ln(), high.ln()));
                }
                ParameterKind::Categorical { values } => {
                    let chosen = match value {
                        Some(ParameterValue::Json(v)) => values.iter().position(|c| c == v),
                        _ => None,
                    };
                    out.extend((0..values.len()).map(|i| if Some(i) == chosen { 1.0 } else { 0.0 }));
                }
            }
        }
        out
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_param<R: Rng + ?Sized>(kind: &ParameterKind, rng: &mut R) -> ParameterValue {
    match kind {
        ParameterKind::FloatRange { low, high } => ParameterValue::Float(rng.gen_range(*low..=*high)),
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
        ParameterKind::LogUniform { low, high } => {
            let log_val: f64 = rng.gen_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp())
        }
        ParameterKind::Categorical { values } => {
            let idx = rng.gen_range(0..values.len());
            ParameterValue::Json(values[idx].clone())
        }
    }
}

fn normalize(value: Option<f64>, low: f64, high: f64) -> f64 {
    match value {
        Some(v) if high > low => ((v - low) / (high - low)).clamp(0.0, 1.0),
        _ => 0.5,
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// A configuration proposed by an optimizer, together with the fraction of
/// the training data (fidelity) it should be evaluated with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub config: Configuration,
    /// In (0, 1]; 1.0 means a full-fidelity evaluation.
    pub budget: f64,
}

impl Suggestion {
    pub fn full(config: Configuration) -> Self {
        Self { config, budget: 1.0 }
    }

    pub fn is_full_budget(&self) -> bool {
        self.budget >= 1.0
    }
}

/// Common trait for all search strategies.
///
/// Strategies maximize the objective they observe. A suggestion that is never
/// observed (the search was cancelled in between) leaves the strategy in a
/// consistent state.
pub trait Optimizer: Send {
    /// Propose the next configuration, or `None` when the strategy is exhausted.
    fn suggest(&mut self) -> Option<Suggestion>;

    /// Report the objective reached by a suggestion. Non-finite objectives mark
    /// failed trials.
    fn observe(&mut self, suggestion: &Suggestion, objective: f64);

    /// Best full-fidelity configuration seen so far (falling back to the best
    /// configuration at any fidelity).
    fn incumbent(&self) -> Option<Configuration>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Which strategy a study uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerType {
    Bayesian,
    Hyperband,
    Random,
}

impl OptimizerType {
    /// Build a seeded strategy instance scoped to `space`.
    pub fn build(&self, space: SearchSpace, seed: u64) -> Box<dyn Optimizer> {
        match self {
            Self::Bayesian => Box::new(BayesianSearch::new(space, seed)),
            Self::Hyperband => Box::new(HyperbandSearch::new(space, seed)),
            Self::Random => Box::new(RandomSearch::new(space, seed)),
        }
    }
}

impl std::str::FromStr for OptimizerType {
    type Err = AgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bayesian" => Ok(Self::Bayesian),
            "hyperband" => Ok(Self::Hyperband),
            "random" => Ok(Self::Random),
            other => Err(AgError::Config(format!("unknown optimizer_type: {other}"))),
        }
    }
}

/// Best finite observation, earliest first on ties.
pub(crate) fn best_observation(observations: &[(Configuration, f64)]) -> Option<&(Configuration, f64)> {
    observations
        .iter()
        .filter(|(_, objective)| objective.is_finite())
        .fold(None, |best: Option<&(Configuration, f64)>, obs| match best {
            Some(b) if b.1 >= obs.1 => Some(b),
            _ => Some(obs),
        })
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    observations: Vec<(Configuration, f64)>,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
            observations: Vec::new(),
        }
    }
}

impl Optimizer for RandomSearch {
    fn suggest(&mut self) -> Option<Suggestion> {
        Some(Suggestion::full(self.space.sample(&mut self.rng)))
    }

    fn observe(&mut self, suggestion: &Suggestion, objective: f64) {
        self.observations.push((suggestion.config.clone(), objective));
    }

    fn incumbent(&self) -> Option<Configuration> {
        best_observation(&self.observations).map(|(c, _)| c.clone())
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search ----

/// Bayesian optimization over a Gaussian-process surrogate.
///
/// The first `n_startup` suggestions are random. After that each suggestion
/// scores a pool of candidates (fresh random draws plus perturbations of the
/// best point) by expected improvement and returns the maximizer. With
/// probability `exploration_weight` a pure random draw is returned instead.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    rng: ChaCha8Rng,
    observations: Vec<(Configuration, f64)>,
    exploration_weight: f64,
    n_startup: usize,
    n_candidates: usize,
    noise_variance: f64,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, seed: u64) -> Self {
        Self {
            space,
            rng: ChaCha8Rng::seed_from_u64(seed),
            observations: Vec::new(),
            exploration_weight: 0.1,
            n_startup: 5,
            n_candidates: 128,
            noise_variance: 1e-4,
        }
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_startup_trials(mut self, n: usize) -> Self {
        self.n_startup = n;
        self
    }

    /// Pure exploration sample.
    fn explore(&mut self) -> Configuration {
        self.space.sample(&mut self.rng)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self) -> Configuration {
        let base = match best_observation(&self.observations) {
            Some((params, _)) => params.clone(),
            None => return self.explore(),
        };

        let mut perturbed = Configuration::new();
        for param in &self.space.parameters {
            let base_val = base.get(&param.name);
            let value = match (&param.kind, base_val) {
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let noise = self.rng.gen_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = self.rng.gen_range(-2..=2);
                    ParameterValue::Int((v + delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = self.rng.gen_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                (ParameterKind::Categorical { .. }, Some(current)) if self.rng.gen::<f64>() < 0.7 => {
                    current.clone()
                }
                // Fall back to random for categoricals or a missing base
                (kind, _) => sample_param(kind, &mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }
        perturbed
    }

    /// Fit the surrogate, imputing failed trials with the worst finite objective.
    fn fit_surrogate(&self) -> Option<GaussianProcess> {
        let worst = self
            .observations
            .iter()
            .map(|(_, y)| *y)
            .filter(|y| y.is_finite())
            .fold(f64::INFINITY, f64::min);
        if !worst.is_finite() {
            return None;
        }
        let x: Vec<Vec<f64>> = self.observations.iter().map(|(c, _)| self.space.encode(c)).collect();
        let y: Vec<f64> = self
            .observations
            .iter()
            .map(|(_, y)| if y.is_finite() { *y } else { worst })
            .collect();
        GaussianProcess::fit(&x, &y, self.noise_variance)
    }

    fn acquire(&mut self, surrogate: &GaussianProcess) -> Configuration {
        let seen: HashSet<String> = self
            .observations
            .iter()
            .map(|(c, _)| configuration_key(c))
            .collect();

        let n_exploit = (self.n_candidates / 4).max(1);
        let mut candidates: Vec<Configuration> = Vec::with_capacity(self.n_candidates + n_exploit);
        for _ in 0..self.n_candidates {
            candidates.push(self.explore());
        }
        for _ in 0..n_exploit {
            candidates.push(self.exploit());
        }

        let mut best: Option<(f64, Configuration)> = None;
        for candidate in candidates {
            if seen.contains(&configuration_key(&candidate)) {
                continue;
            }
            let ei = surrogate.expected_improvement(&self.space.encode(&candidate));
            if best.as_ref().map_or(true, |(b, _)| ei > *b) {
                best = Some((ei, candidate));
            }
        }
        match best {
            Some((_, config)) => config,
            // Every candidate was already evaluated; the space is likely tiny.
            None => self.explore(),
        }
    }
}

impl Optimizer for BayesianSearch {
    fn suggest(&mut self) -> Option<Suggestion> {
        if self.space.is_empty() {
            return Some(Suggestion::full(Configuration::new()));
        }
        let warm = self.observations.len() >= self.n_startup;
        let config = if !warm || self.rng.gen::<f64>() < self.exploration_weight {
            self.explore()
        } else {
            match self.fit_surrogate() {
                Some(surrogate) => self.acquire(&surrogate),
                None => self.exploit(),
            }
        };
        Some(Suggestion::full(config))
    }

    fn observe(&mut self, suggestion: &Suggestion, objective: f64) {
        self.observations.push((suggestion.config.clone(), objective));
    }

    fn incumbent(&self) -> Option<Configuration> {
        best_observation(&self.observations).map(|(c, _)| c.clone())
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("n_neighbors", 1, 15)
            .add_int("max_iter", 20, 50)
            .add_float("alpha", 0.5, 1.0)
    }

    #[test]
    fn random_search_respects_bounds() {
        let mut rs = RandomSearch::new(sample_space(), 7);
        for _ in 0..50 {
            let params = rs.suggest().unwrap().config;
            match params.get("n_neighbors") {
                Some(ParameterValue::Int(v)) => assert!(*v >= 1 && *v <= 15),
                other => panic!("unexpected n_neighbors value: {other:?}"),
            }
            match params.get("alpha") {
                Some(ParameterValue::Float(v)) => assert!(*v >= 0.5 && *v <= 1.0),
                other => panic!("unexpected alpha value: {other:?}"),
            }
        }
    }

    #[test]
    fn seeded_strategies_are_reproducible() {
        let mut a = BayesianSearch::new(sample_space(), 42);
        let mut b = BayesianSearch::new(sample_space(), 42);
        for i in 0..12 {
            let sa = a.suggest().unwrap();
            let sb = b.suggest().unwrap();
            assert_eq!(sa, sb);
            let objective = i as f64 * 0.1;
            a.observe(&sa, objective);
            b.observe(&sb, objective);
        }
    }

    #[test]
    fn bayesian_search_starts_with_exploration() {
        let mut bs = BayesianSearch::new(sample_space(), 0);
        // No observations yet, so every suggestion is a random draw
        for _ in 0..10 {
            assert_eq!(bs.suggest().unwrap().config.len(), 3);
        }
    }

    #[test]
    fn bayesian_search_moves_toward_better_region() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let mut bs = BayesianSearch::new(space, 3)
            .with_startup_trials(4)
            .with_exploration_weight(0.0);

        let objective = |x: f64| -(x - 0.8).powi(2);
        let mut best = f64::NEG_INFINITY;
        for _ in 0..25 {
            let s = bs.suggest().unwrap();
            let x = s.config["x"].as_f64().unwrap();
            let y = objective(x);
            best = best.max(y);
            bs.observe(&s, y);
        }
        assert!(best > -0.01, "best objective {best}");
        let incumbent = bs.incumbent().unwrap();
        assert!((incumbent["x"].as_f64().unwrap() - 0.8).abs() < 0.1);
    }

    #[test]
    fn bayesian_search_survives_failed_trials() {
        let space = SearchSpace::new().add_int("k", 1, 30);
        let mut bs = BayesianSearch::new(space, 9).with_startup_trials(2);
        for i in 0..10 {
            let s = bs.suggest().unwrap();
            let objective = if i % 3 == 0 { f64::NEG_INFINITY } else { i as f64 };
            bs.observe(&s, objective);
        }
        assert!(bs.suggest().is_some());
        assert!(bs.incumbent().is_some());
    }

    #[test]
    fn unobserved_suggestion_leaves_state_consistent() {
        let mut bs = BayesianSearch::new(sample_space(), 1).with_startup_trials(1);
        let first = bs.suggest().unwrap();
        bs.observe(&first, 0.5);
        // Suggested but never observed, as when a study is cancelled mid-trial
        let _dangling = bs.suggest().unwrap();
        assert_eq!(bs.incumbent(), Some(first.config));
    }

    #[test]
    fn empty_space_suggests_empty_configuration() {
        let mut bs = BayesianSearch::new(SearchSpace::new(), 0);
        assert!(bs.suggest().unwrap().config.is_empty());
    }

    #[test]
    fn categorical_parameter_works() {
        let space = SearchSpace::new().add_categorical(
            "criterion",
            vec![
                serde_json::json!("gini"),
                serde_json::json!("entropy"),
                serde_json::json!("log_loss"),
            ],
        );
        let mut rs = RandomSearch::new(space, 5);
        for _ in 0..30 {
            let params = rs.suggest().unwrap().config;
            let s = params["criterion"].as_str().unwrap();
            assert!(["gini", "entropy", "log_loss"].contains(&s));
        }
    }

    #[test]
    fn log_uniform_stays_in_bounds() {
        let space = SearchSpace::new().add_log_uniform("lr", 1e-5, 1e-1);
        let mut rs = RandomSearch::new(space, 11);
        for _ in 0..100 {
            let v = rs.suggest().unwrap().config["lr"].as_f64().unwrap();
            assert!((1e-5..=1e-1).contains(&v), "lr out of bounds: {v}");
        }
    }

    #[test]
    fn encode_one_hot_and_normalizes() {
        let space = SearchSpace::new()
            .add_int("a", 0, 10)
            .add_categorical("b", vec![serde_json::json!(1), serde_json::json!(2)]);
        let mut config = Configuration::new();
        config.insert("a".into(), ParameterValue::Int(5));
        config.insert("b".into(), ParameterValue::Json(serde_json::json!(2)));
        assert_eq!(space.encoded_len(), 3);
        assert_eq!(space.encode(&config), vec![0.5, 0.0, 1.0]);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        assert!(SearchSpace::new().add_int("a", 5, 1).validate().is_err());
        assert!(SearchSpace::new().add_categorical("b", vec![]).validate().is_err());
        assert!(SearchSpace::new().add_log_uniform("c", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new()
            .add_int("a", 1, 2)
            .add_int("a", 1, 2)
            .validate()
            .is_err());
        assert!(sample_space().validate().is_ok());
    }

    #[test]
    fn prefixed_spaces_concatenate() {
        let scaler = SearchSpace::new().add_int("degree", 1, 3).prefixed("scaler");
        let model = SearchSpace::new().add_float("alpha", 0.0, 1.0).prefixed("ridge");
        let joint = scaler.extend(model);
        let names: Vec<&str> = joint.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["scaler.degree", "ridge.alpha"]);
    }

    #[test]
    fn parameter_values_survive_json() {
        let mut config = Configuration::new();
        config.insert("k".into(), ParameterValue::Int(3));
        config.insert("lr".into(), ParameterValue::Float(0.5));
        config.insert("mode".into(), ParameterValue::Json(serde_json::json!("fast")));
        let json = serde_json::to_string(&config).unwrap();
        let back: Configuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(configuration_key(&config), "k=3;lr=0.5;mode=\"fast\"");
    }

    #[test]
    fn optimizer_type_parses_names() {
        assert_eq!("hyperband".parse::<OptimizerType>().unwrap(), OptimizerType::Hyperband);
        assert!("annealing".parse::<OptimizerType>().unwrap_err().is_config());
    }
}
