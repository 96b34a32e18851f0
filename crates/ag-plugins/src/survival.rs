//! Built-in survival estimator.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use ag_optimizer::{Configuration, SearchSpace};
use ag_types::{AgResult, Dataset};

use crate::plugin::{check_width, fit_failed, not_fitted, Params, Plugin, PluginCategory};
use crate::regression::cholesky_solve;
use crate::registry::PluginRegistry;

pub(crate) fn register(registry: &mut PluginRegistry) {
    registry.register(
        PluginCategory::Survival,
        "cox_ph",
        CoxPh::space(),
        |c| Ok(Box::new(CoxPh::new(c)?) as Box<dyn Plugin>),
        |b| Ok(Box::new(serde_json::from_slice::<CoxPh>(b)?) as Box<dyn Plugin>),
    );
}

/// Fitted Cox model state. Features are standardized before fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoxState {
    mean: Array1<f64>,
    scale: Array1<f64>,
    beta: Array1<f64>,
    /// Distinct event times, ascending, with the Breslow cumulative baseline hazard.
    event_times: Vec<f64>,
    cumulative_hazard: Vec<f64>,
}

/// Cox proportional hazards with an L2 penalty, fitted by Newton-Raphson on
/// the Breslow partial likelihood.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoxPh {
    penalizer: f64,
    max_iter: usize,
    state: Option<CoxState>,
}

impl CoxPh {
    pub fn space() -> SearchSpace {
        SearchSpace::new()
            .add_log_uniform("penalizer", 1e-4, 1.0)
            .add_int("max_iter", 10, 50)
    }

    pub fn new(config: &Configuration) -> AgResult<Self> {
        let params = Params::new("cox_ph", config);
        Ok(Self {
            penalizer: params.float("penalizer", 0.01)?,
            max_iter: params.count("max_iter", 30)?,
            state: None,
        })
    }

    fn standardized(state: &CoxState, x: &Array2<f64>) -> Array2<f64> {
        (x - &state.mean) / &state.scale
    }

    /// Penalized log partial likelihood, gradient and negative Hessian at `beta`.
    fn derivatives(
        &self,
        x: &Array2<f64>,
        times: &Array1<f64>,
        events: &Array1<f64>,
        order: &[usize],
        beta: &Array1<f64>,
    ) -> (f64, Array1<f64>, Array2<f64>) {
        let d = x.ncols();
        let eta = x.dot(beta);
        let mut loglik = -0.5 * self.penalizer * beta.dot(beta);
        let mut gradient = beta * -self.penalizer;
        let mut information = Array2::<f64>::eye(d) * self.penalizer;

        let mut s0 = 0.0;
        let mut s1 = Array1::<f64>::zeros(d);
        let mut s2 = Array2::<f64>::zeros((d, d));
        // Walk times in descending order so the risk set only grows.
        let mut start = 0;
        while start < order.len() {
            let t = times[order[start]];
            let mut end = start;
            while end < order.len() && times[order[end]] == t {
                let i = order[end];
                let w = eta[i].exp();
                let row = x.row(i);
                s0 += w;
                s1.scaled_add(w, &row);
                let outer = row
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&row.view().insert_axis(Axis(0)));
                s2.scaled_add(w, &outer);
                end += 1;
            }
            let mean = &s1 / s0;
            for &i in &order[start..end] {
                if events[i] != 1.0 {
                    continue;
                }
                loglik += eta[i] - s0.ln();
                gradient += &(&x.row(i) - &mean);
                let mean_outer = mean
                    .view()
                    .insert_axis(Axis(1))
                    .dot(&mean.view().insert_axis(Axis(0)));
                information += &(&s2 / s0 - &mean_outer);
            }
            start = end;
        }
        (loglik, gradient, information)
    }
}

impl Plugin for CoxPh {
    fn name(&self) -> &str {
        "cox_ph"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Survival
    }

    fn hyperparameter_space(&self) -> SearchSpace {
        Self::space()
    }

    fn fit(&mut self, data: &Dataset) -> AgResult<()> {
        let times = data
            .time_to_event
            .as_ref()
            .ok_or_else(|| fit_failed(self.name(), "time_to_event is required"))?;
        let events = &data.target;
        if !events.iter().any(|e| *e == 1.0) {
            return Err(fit_failed(self.name(), "no observed events"));
        }

        let mean = data
            .features
            .mean_axis(Axis(0))
            .ok_or_else(|| fit_failed(self.name(), "empty input"))?;
        let scale = data
            .features
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let x = (&data.features - &mean) / &scale;

        let mut order: Vec<usize> = (0..x.nrows()).collect();
        order.sort_by(|a, b| times[*b].total_cmp(&times[*a]));

        let mut beta = Array1::<f64>::zeros(x.ncols());
        let (mut loglik, mut gradient, mut information) =
            self.derivatives(&x, times, events, &order, &beta);
        for _ in 0..self.max_iter {
            let mut step = cholesky_solve(&information, &gradient)
                .ok_or_else(|| fit_failed(self.name(), "information matrix is singular"))?;
            // Halve the step until the likelihood stops decreasing.
            let mut accepted = false;
            for _ in 0..20 {
                let candidate = &beta + &step;
                let (next_loglik, next_gradient, next_information) =
                    self.derivatives(&x, times, events, &order, &candidate);
                if next_loglik.is_finite() && next_loglik >= loglik - 1e-12 {
                    beta = candidate;
                    loglik = next_loglik;
                    gradient = next_gradient;
                    information = next_information;
                    accepted = true;
                    break;
                }
                step /= 2.0;
            }
            if !accepted || step.iter().map(|s| s.abs()).fold(0.0, f64::max) < 1e-8 {
                break;
            }
        }
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(fit_failed(self.name(), "coefficients diverged"));
        }

        // Breslow baseline hazard at each distinct event time, ascending.
        let partial_hazard = x.dot(&beta).mapv(f64::exp);
        let mut event_times: Vec<f64> = times
            .iter()
            .zip(events.iter())
            .filter(|(_, e)| **e == 1.0)
            .map(|(t, _)| *t)
            .collect();
        event_times.sort_by(|a, b| a.total_cmp(b));
        event_times.dedup();
        let mut cumulative_hazard = Vec::with_capacity(event_times.len());
        let mut total = 0.0;
        for t in &event_times {
            let deaths = times
                .iter()
                .zip(events.iter())
                .filter(|(ti, e)| **ti == *t && **e == 1.0)
                .count() as f64;
            let at_risk: f64 = times
                .iter()
                .zip(partial_hazard.iter())
                .filter(|(ti, _)| **ti >= *t)
                .map(|(_, h)| h)
                .sum();
            total += deaths / at_risk;
            cumulative_hazard.push(total);
        }

        self.state = Some(CoxState {
            mean,
            scale,
            beta,
            event_times,
            cumulative_hazard,
        });
        Ok(())
    }

    /// Partial hazard `exp(x·β)`; larger means higher risk.
    fn predict(&self, x: &Array2<f64>) -> AgResult<Array1<f64>> {
        let state = self.state.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        check_width(state.beta.len(), x)?;
        Ok(Self::standardized(state, x).dot(&state.beta).mapv(f64::exp))
    }

    fn predict_risk(&self, x: &Array2<f64>, horizon: f64) -> AgResult<Array1<f64>> {
        let state = self.state.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let partial_hazard = self.predict(x)?;
        let idx = state.event_times.partition_point(|t| *t <= horizon);
        let baseline = if idx == 0 { 0.0 } else { state.cumulative_hazard[idx - 1] };
        Ok(partial_hazard.mapv(|h| 1.0 - (-baseline * h).exp()))
    }

    fn save(&self) -> AgResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn boxed_clone(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Exponential survival times whose hazard grows with the first feature.
    fn hazard_data(n: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut x = Array2::<f64>::zeros((n, 2));
        let mut times = Array1::<f64>::zeros(n);
        let mut events = Array1::<f64>::zeros(n);
        for i in 0..n {
            x[[i, 0]] = rng.gen_range(-1.0..1.0);
            x[[i, 1]] = rng.gen_range(-1.0..1.0);
            let rate = (1.5 * x[[i, 0]]).exp();
            let u: f64 = rng.gen_range(1e-6..1.0);
            let t = -u.ln() / rate;
            let censor = rng.gen_range(0.0..3.0);
            times[i] = t.min(censor);
            events[i] = if t <= censor { 1.0 } else { 0.0 };
        }
        Dataset::new(x, events).unwrap().with_time_to_event(times).unwrap()
    }

    #[test]
    fn learns_direction_of_hazard() {
        let data = hazard_data(200, 4);
        let mut model = CoxPh::new(&Configuration::new()).unwrap();
        model.fit(&data).unwrap();
        let beta = &model.state.as_ref().unwrap().beta;
        assert!(beta[0] > 0.5, "beta = {beta}");
        assert!(beta[0] > beta[1].abs());
    }

    #[test]
    fn risk_increases_with_horizon_and_hazard() {
        let data = hazard_data(150, 5);
        let mut model = CoxPh::new(&Configuration::new()).unwrap();
        model.fit(&data).unwrap();
        let x = array![[-0.8, 0.0], [0.8, 0.0]];
        let early = model.predict_risk(&x, 0.2).unwrap();
        let late = model.predict_risk(&x, 1.5).unwrap();
        assert!(early[1] > early[0]);
        assert!(late[0] >= early[0] && late[1] >= early[1]);
        assert!(late.iter().all(|r| (0.0..=1.0).contains(r)));
    }

    #[test]
    fn requires_event_times() {
        let data = Dataset::new(array![[1.0], [2.0]], array![1.0, 0.0]).unwrap();
        let mut model = CoxPh::new(&Configuration::new()).unwrap();
        assert!(model.fit(&data).is_err());
    }

    #[test]
    fn saved_model_reloads() {
        let data = hazard_data(80, 6);
        let mut model = CoxPh::new(&Configuration::new()).unwrap();
        model.fit(&data).unwrap();
        let restored: CoxPh = serde_json::from_slice(&model.save().unwrap()).unwrap();
        assert_eq!(
            restored.predict_risk(&data.features, 1.0).unwrap(),
            model.predict_risk(&data.features, 1.0).unwrap()
        );
    }
}
