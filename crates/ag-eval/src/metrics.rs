//! Scoring functions for every metric a study can optimize.
//!
//! All functions reject predictions containing NaN with [`AgError::Scoring`]:
//! a NaN means the model is broken, not merely weak.

use ndarray::{Array1, Array2, ArrayView1};
use tracing::debug;

use ag_types::{AgError, AgResult};

fn ensure_finite_predictions<'a, I>(values: I) -> AgResult<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    if values.into_iter().any(|v| v.is_nan()) {
        return Err(AgError::Scoring("nan in predictions".to_string()));
    }
    Ok(())
}

fn ensure_same_len(expected: usize, actual: usize, what: &str) -> AgResult<()> {
    if expected != actual {
        return Err(AgError::Scoring(format!(
            "{what} has {actual} rows, expected {expected}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Area under the ROC curve via the Mann-Whitney statistic. Tied scores
/// between a positive and a negative count one half.
fn roc_auc(labels: &[bool], scores: &[f64]) -> AgResult<f64> {
    let positives = labels.iter().filter(|l| **l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(AgError::Scoring(
            "only one class present in y_true, ROC AUC is undefined".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

    // Average 1-based ranks over runs of tied scores.
    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        positive_rank_sum += rank * order[start..end].iter().filter(|i| labels[**i]).count() as f64;
        start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Average precision: precision at each distinct threshold weighted by the
/// recall gained there.
fn average_precision(labels: &[bool], scores: &[f64]) -> AgResult<f64> {
    let positives = labels.iter().filter(|l| **l).count();
    if positives == 0 {
        return Err(AgError::Scoring(
            "no positive samples in y_true, average precision is undefined".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));

    let mut true_positives = 0usize;
    let mut seen = 0usize;
    let mut previous_recall = 0.0;
    let mut ap = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            if labels[order[end]] {
                true_positives += 1;
            }
            end += 1;
        }
        seen += end - start;
        let recall = true_positives as f64 / positives as f64;
        let precision = true_positives as f64 / seen as f64;
        ap += (recall - previous_recall) * precision;
        previous_recall = recall;
        start = end;
    }
    Ok(ap)
}

/// Positive-class scores from a probability matrix: the second column of a
/// two-column matrix, or the only column of a one-column matrix.
fn positive_class_scores(proba: &Array2<f64>) -> AgResult<Array1<f64>> {
    match proba.ncols() {
        1 => Ok(proba.column(0).to_owned()),
        2 => Ok(proba.column(1).to_owned()),
        n => Err(AgError::Scoring(format!(
            "binary scoring needs one or two probability columns, got {n}"
        ))),
    }
}

/// ROC AUC and average precision for a probability matrix.
///
/// With two classes the larger label is the positive class. With more than
/// two, both scores are micro-averaged over the one-vs-rest binarization of
/// `y_true`, and `proba` must hold one column per class in `classes` order.
/// When `classes` is `None` it is inferred as the sorted set of observed
/// labels.
pub fn evaluate_auc(
    y_true: &Array1<f64>,
    proba: &Array2<f64>,
    classes: Option<&[f64]>,
) -> AgResult<(f64, f64)> {
    ensure_finite_predictions(proba.iter())?;
    ensure_same_len(y_true.len(), proba.nrows(), "probability matrix")?;

    let classes: Vec<f64> = match classes {
        Some(classes) => classes.to_vec(),
        None => {
            let mut observed: Vec<f64> = y_true.iter().copied().collect();
            observed.sort_by(|a, b| a.total_cmp(b));
            observed.dedup();
            if observed.len() > 2 {
                debug!(
                    n_classes = observed.len(),
                    classes = ?observed,
                    "classes not given and more than two present, assuming the sorted set of labels"
                );
            }
            observed
        }
    };

    if classes.len() <= 2 {
        let positive = classes
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let labels: Vec<bool> = y_true.iter().map(|y| *y == positive).collect();
        let scores = positive_class_scores(proba)?.to_vec();
        return Ok((roc_auc(&labels, &scores)?, average_precision(&labels, &scores)?));
    }

    if proba.ncols() != classes.len() {
        return Err(AgError::Scoring(format!(
            "{} probability columns for {} classes",
            proba.ncols(),
            classes.len()
        )));
    }
    let mut labels = Vec::with_capacity(proba.len());
    let mut scores = Vec::with_capacity(proba.len());
    for (y, row) in y_true.iter().zip(proba.rows()) {
        for (class, p) in classes.iter().zip(row.iter()) {
            labels.push(*y == *class);
            scores.push(*p);
        }
    }
    Ok((roc_auc(&labels, &scores)?, average_precision(&labels, &scores)?))
}

// ---------------------------------------------------------------------------
// Survival
// ---------------------------------------------------------------------------

/// Kaplan-Meier estimate of the censoring survival function `G(t)`.
///
/// Censoring at the same time as an event is treated as happening just after
/// it, so events leave the risk set first.
#[derive(Debug, Clone)]
struct CensoringSurvival {
    times: Vec<f64>,
    survival: Vec<f64>,
}

impl CensoringSurvival {
    fn fit(times: ArrayView1<f64>, events: ArrayView1<f64>) -> Self {
        let mut censored: Vec<f64> = times
            .iter()
            .zip(events.iter())
            .filter(|(_, e)| **e != 1.0)
            .map(|(t, _)| *t)
            .collect();
        censored.sort_by(|a, b| a.total_cmp(b));
        censored.dedup();

        let mut survival = Vec::with_capacity(censored.len());
        let mut current = 1.0;
        for c in &censored {
            let mut at_risk = 0usize;
            let mut dropped = 0usize;
            for (t, e) in times.iter().zip(events.iter()) {
                if *t > *c || (*t == *c && *e != 1.0) {
                    at_risk += 1;
                }
                if *t == *c && *e != 1.0 {
                    dropped += 1;
                }
            }
            if at_risk > 0 {
                current *= 1.0 - dropped as f64 / at_risk as f64;
            }
            survival.push(current);
        }
        Self {
            times: censored,
            survival,
        }
    }

    /// `G(t)`: probability of remaining uncensored beyond `t`.
    fn at(&self, t: f64) -> f64 {
        let idx = self.times.partition_point(|c| *c <= t);
        if idx == 0 {
            1.0
        } else {
            self.survival[idx - 1]
        }
    }
}

/// Concordance index with inverse-probability-of-censoring weights, truncated
/// at `horizon`.
///
/// `risk` holds one score per test row where larger means earlier expected
/// events. The censoring distribution comes from the training rows. Only
/// events strictly before `horizon` anchor comparable pairs; each anchor is
/// weighted by `1 / G(t)^2`.
pub fn evaluate_c_index(
    train_times: &Array1<f64>,
    train_events: &Array1<f64>,
    risk: &Array1<f64>,
    test_times: &Array1<f64>,
    test_events: &Array1<f64>,
    horizon: f64,
) -> AgResult<f64> {
    ensure_finite_predictions(risk.iter())?;
    ensure_same_len(test_times.len(), risk.len(), "risk vector")?;
    ensure_same_len(test_times.len(), test_events.len(), "test events")?;
    ensure_same_len(train_times.len(), train_events.len(), "train events")?;

    let censoring = CensoringSurvival::fit(train_times.view(), train_events.view());

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..test_times.len() {
        let t_i = test_times[i];
        if test_events[i] != 1.0 || t_i >= horizon {
            continue;
        }
        let g = censoring.at(t_i);
        if g <= 0.0 {
            return Err(AgError::Scoring(format!(
                "censoring survival function is zero at t = {t_i}"
            )));
        }
        let weight = 1.0 / (g * g);
        for j in 0..test_times.len() {
            if test_times[j] <= t_i {
                continue;
            }
            denominator += weight;
            if risk[i] > risk[j] {
                numerator += weight;
            } else if risk[i] == risk[j] {
                numerator += 0.5 * weight;
            }
        }
    }

    if denominator == 0.0 {
        return Err(AgError::Scoring("no comparable pairs in the test data".to_string()));
    }
    Ok(numerator / denominator)
}

/// Brier score at `horizon` with inverse-probability-of-censoring weights.
///
/// `risk` is the predicted probability of the event by `horizon`; survival is
/// taken as `1 - risk`. Rows censored before `horizon` contribute nothing.
pub fn evaluate_brier_score(
    train_times: &Array1<f64>,
    train_events: &Array1<f64>,
    risk: &Array1<f64>,
    test_times: &Array1<f64>,
    test_events: &Array1<f64>,
    horizon: f64,
) -> AgResult<f64> {
    ensure_finite_predictions(risk.iter())?;
    ensure_same_len(test_times.len(), risk.len(), "risk vector")?;
    ensure_same_len(test_times.len(), test_events.len(), "test events")?;
    ensure_same_len(train_times.len(), train_events.len(), "train events")?;
    if test_times.is_empty() {
        return Err(AgError::Scoring("no test rows to score".to_string()));
    }

    let censoring = CensoringSurvival::fit(train_times.view(), train_events.view());
    let g_horizon = censoring.at(horizon);

    let total: f64 = test_times
        .iter()
        .zip(test_events.iter())
        .zip(risk.iter())
        .map(|((t, e), r)| {
            let survival = 1.0 - r;
            if *t <= horizon && *e == 1.0 {
                let g = censoring.at(*t);
                if g > 0.0 {
                    survival * survival / g
                } else {
                    0.0
                }
            } else if *t > horizon && g_horizon > 0.0 {
                (1.0 - survival) * (1.0 - survival) / g_horizon
            } else {
                0.0
            }
        })
        .sum();
    Ok(total / test_times.len() as f64)
}

// ---------------------------------------------------------------------------
// Regression
// ---------------------------------------------------------------------------

fn residuals(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> AgResult<Array1<f64>> {
    ensure_finite_predictions(y_pred.iter())?;
    ensure_same_len(y_true.len(), y_pred.len(), "prediction vector")?;
    if y_true.is_empty() {
        return Err(AgError::Scoring("no rows to score".to_string()));
    }
    Ok(y_true - y_pred)
}

pub fn rmse(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> AgResult<f64> {
    let residuals = residuals(y_true, y_pred)?;
    Ok(residuals.mapv(|r| r * r).mean().unwrap_or(0.0).sqrt())
}

pub fn mae(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> AgResult<f64> {
    let residuals = residuals(y_true, y_pred)?;
    Ok(residuals.mapv(f64::abs).mean().unwrap_or(0.0))
}

/// Coefficient of determination. A constant target scores 1 when predicted
/// exactly and 0 otherwise.
pub fn r2(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> AgResult<f64> {
    let residuals = residuals(y_true, y_pred)?;
    let ss_res = residuals.mapv(|r| r * r).sum();
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_tot = y_true.mapv(|y| (y - mean) * (y - mean)).sum();
    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Mean of per-fold values and the half-width of its 95% interval
/// (`1.96 * std / sqrt(n)`, population standard deviation).
pub fn generate_score(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, 1.96 * variance.sqrt() / n.sqrt())
}

fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Render a score as `"mean +/- interval"`, each rounded to four decimals.
pub fn print_score(score: (f64, f64)) -> String {
    format!("{:?} +/- {:?}", round4(score.0), round4(score.1))
}
