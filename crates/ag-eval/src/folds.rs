//! Train/held-out partitions for cross-validation.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ag_types::{validation_error, AgError, AgResult, Dataset, TaskFamily};

/// Share of rows held out when cross-validation is disabled.
pub const HOLDOUT_FRACTION: f64 = 0.2;

/// A single train/held-out split, as row indices into the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// How the rows were partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoldStrategy {
    /// One seeded split holding out [`HOLDOUT_FRACTION`] of the rows.
    Holdout,
    /// Shuffled k-fold.
    KFold { n_splits: usize },
    /// Shuffled k-fold keeping each class's share roughly equal per fold.
    StratifiedKFold { n_splits: usize },
    /// K-fold over whole groups; no group spans train and held-out rows.
    GroupKFold { n_splits: usize },
}

/// The folds one search evaluates every candidate on.
///
/// The plan is computed once per search so every trial sees the same
/// partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldPlan {
    strategy: FoldStrategy,
    folds: Vec<Fold>,
}

impl FoldPlan {
    /// Pick a strategy for `data` and split it.
    ///
    /// `cv = 0` is a holdout split. With group ids the split is group-aware;
    /// otherwise classification stratifies by label and other tasks shuffle.
    pub fn for_dataset(data: &Dataset, task: TaskFamily, cv: usize, seed: u64) -> AgResult<Self> {
        let n = data.n_samples();
        let groups = data.group_ids.as_ref().map(|g| g.to_vec());
        let labels = (task == TaskFamily::Classification).then(|| data.target.to_vec());

        let plan = match cv {
            0 => Self {
                strategy: FoldStrategy::Holdout,
                folds: vec![holdout(n, groups.as_deref(), labels.as_deref(), seed)?],
            },
            1 => {
                return Err(AgError::Config(
                    "cv must be 0 (holdout) or at least 2".to_string(),
                ))
            }
            k if k > n => {
                return Err(validation_error!("cv = {k} exceeds the {n} available rows"))
            }
            k => match (groups.as_deref(), labels.as_deref()) {
                (Some(groups), _) => Self {
                    strategy: FoldStrategy::GroupKFold { n_splits: k },
                    folds: group_k_fold(groups, k)?,
                },
                (None, Some(labels)) => Self {
                    strategy: FoldStrategy::StratifiedKFold { n_splits: k },
                    folds: stratified_k_fold(labels, k, seed),
                },
                (None, None) => Self {
                    strategy: FoldStrategy::KFold { n_splits: k },
                    folds: k_fold(n, k, seed),
                },
            },
        };
        debug!(strategy = ?plan.strategy, folds = plan.folds.len(), rows = n, "planned folds");
        Ok(plan)
    }

    pub fn strategy(&self) -> FoldStrategy {
        self.strategy
    }

    pub fn folds(&self) -> &[Fold] {
        &self.folds
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    /// Every held-out row across all folds, ascending.
    pub fn held_out_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.folds.iter().flat_map(|f| f.test.iter().copied()).collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

/// Turn per-fold test sets into train/test pairs.
fn folds_from_buckets(buckets: Vec<Vec<usize>>) -> Vec<Fold> {
    (0..buckets.len())
        .map(|k| {
            let mut test = buckets[k].clone();
            test.sort_unstable();
            let mut train: Vec<usize> = buckets
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != k)
                .flat_map(|(_, b)| b.iter().copied())
                .collect();
            train.sort_unstable();
            Fold { train, test }
        })
        .collect()
}

fn k_fold(n_samples: usize, n_splits: usize, seed: u64) -> Vec<Fold> {
    let mut indices: Vec<usize> = (0..n_samples).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

    let base = n_samples / n_splits;
    let remainder = n_samples % n_splits;
    let mut buckets = Vec::with_capacity(n_splits);
    let mut current = 0;
    for k in 0..n_splits {
        let size = if k < remainder { base + 1 } else { base };
        buckets.push(indices[current..current + size].to_vec());
        current += size;
    }
    folds_from_buckets(buckets)
}

/// Row indices per distinct label, in ascending label order.
fn rows_by_label(labels: &[f64]) -> Vec<Vec<usize>> {
    let mut by_label: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|a, b| labels[*a].total_cmp(&labels[*b]));
    let mut rank = 0u64;
    for (pos, &i) in order.iter().enumerate() {
        if pos > 0 && labels[order[pos - 1]] != labels[i] {
            rank += 1;
        }
        by_label.entry(rank).or_default().push(i);
    }
    by_label.into_values().collect()
}

fn stratified_k_fold(labels: &[f64], n_splits: usize, seed: u64) -> Vec<Fold> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
    // Dealing continues across classes so fold sizes stay balanced.
    let mut next = 0;
    for mut rows in rows_by_label(labels) {
        if rows.len() < n_splits {
            warn!(
                members = rows.len(),
                n_splits, "a class has fewer members than folds; some folds will miss it"
            );
        }
        rows.shuffle(&mut rng);
        for row in rows {
            buckets[next % n_splits].push(row);
            next += 1;
        }
    }
    folds_from_buckets(buckets)
}

/// Assign whole groups to folds, largest group first, each to the fold with
/// the fewest rows so far. Ties go to the lower fold index and, among equal
/// groups, to the smaller group id.
fn group_k_fold(groups: &[i64], n_splits: usize) -> AgResult<Vec<Fold>> {
    let mut by_group: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (row, group) in groups.iter().enumerate() {
        by_group.entry(*group).or_default().push(row);
    }
    if by_group.len() < n_splits {
        return Err(validation_error!(
            "cv = {n_splits} exceeds the {} distinct groups",
            by_group.len()
        ));
    }

    let mut ordered: Vec<(i64, Vec<usize>)> = by_group.into_iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
    for (_, rows) in ordered {
        let lightest = (0..n_splits)
            .min_by_key(|k| (buckets[*k].len(), *k))
            .unwrap_or(0);
        buckets[lightest].extend(rows);
    }
    Ok(folds_from_buckets(buckets))
}

fn holdout_size(n: usize) -> usize {
    ((n as f64 * HOLDOUT_FRACTION).round() as usize).clamp(1, n.saturating_sub(1))
}

fn holdout(n: usize, groups: Option<&[i64]>, labels: Option<&[f64]>, seed: u64) -> AgResult<Fold> {
    if n < 2 {
        return Err(validation_error!("a holdout split needs at least two rows"));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut test = Vec::new();

    if let Some(groups) = groups {
        let mut by_group: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, group) in groups.iter().enumerate() {
            by_group.entry(*group).or_default().push(row);
        }
        if by_group.len() < 2 {
            return Err(validation_error!("a group-aware holdout split needs at least two groups"));
        }
        let mut ordered: Vec<Vec<usize>> = by_group.into_values().collect();
        ordered.shuffle(&mut rng);
        let target = holdout_size(n);
        // Always leave at least one group for training.
        let last = ordered.len() - 1;
        for rows in ordered.into_iter().take(last) {
            if test.len() >= target {
                break;
            }
            test.extend(rows);
        }
    } else if let Some(labels) = labels {
        for mut rows in rows_by_label(labels) {
            if rows.len() < 2 {
                continue;
            }
            rows.shuffle(&mut rng);
            let size = holdout_size(rows.len());
            test.extend(rows.into_iter().take(size));
        }
    } else {
        let mut rows: Vec<usize> = (0..n).collect();
        rows.shuffle(&mut rng);
        test.extend(rows.into_iter().take(holdout_size(n)));
    }

    test.sort_unstable();
    let held: BTreeSet<usize> = test.iter().copied().collect();
    let train = (0..n).filter(|i| !held.contains(i)).collect();
    Ok(Fold { train, test })
}
