//! Ensemble outlier filtering for training tables.
//!
//! Zero targets are dropped first: a zero cost means the category does not
//! apply to the project, not that the row is anomalous. Small tables are then
//! returned untouched. Larger tables are standardized and scored by up to four
//! detectors whose boolean flags are combined by vote.

use crate::config::OutlierConfig;
use crate::regression::StandardScaler;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Euler–Mascheroni constant used by the isolation path-length correction.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
/// Largest subsample drawn for one isolation tree.
const MAX_TREE_SAMPLES: usize = 256;

/// Individual anomaly detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    IsolationForest,
    LocalOutlierFactor,
    ModifiedZScore,
    ZScore,
}

impl OutlierMethod {
    pub const ALL: [OutlierMethod; 4] = [
        OutlierMethod::IsolationForest,
        OutlierMethod::LocalOutlierFactor,
        OutlierMethod::ModifiedZScore,
        OutlierMethod::ZScore,
    ];
}

/// How detector flags are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingStrategy {
    /// Outlier when at least `voting_threshold` of the detectors agree
    Majority,
    /// Outlier only when every detector agrees
    Unanimous,
}

/// Flags raised by each active detector for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlierVote {
    pub flags: Vec<(OutlierMethod, bool)>,
}

impl OutlierVote {
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|(_, flagged)| *flagged).count()
    }
}

/// Ensemble outlier filter.
#[derive(Debug, Clone)]
pub struct OutlierFilter {
    config: OutlierConfig,
}

impl Default for OutlierFilter {
    fn default() -> Self {
        Self::new(OutlierConfig::default())
    }
}

impl OutlierFilter {
    pub fn new(config: OutlierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Rows of `table` that survive filtering, in their original order.
    ///
    /// `target_col` indexes the cost column inside each row; every other
    /// column is treated as a numeric feature.
    pub fn filter(&self, table: &[Vec<f64>], target_col: usize) -> Vec<Vec<f64>> {
        self.retain_indices(table, target_col)
            .into_iter()
            .map(|i| table[i].clone())
            .collect()
    }

    /// Indices of the rows that survive filtering.
    pub fn retain_indices(&self, table: &[Vec<f64>], target_col: usize) -> Vec<usize> {
        let nonzero: Vec<usize> = (0..table.len())
            .filter(|&i| table[i].get(target_col).is_some_and(|v| *v != 0.0))
            .collect();

        if nonzero.len() < self.config.min_rows || self.config.methods.is_empty() {
            return nonzero;
        }

        let rows: Vec<Vec<f64>> = nonzero.iter().map(|&i| table[i].clone()).collect();
        let votes = self.votes(&rows, target_col);
        let active = self.config.methods.len();

        let kept: Vec<usize> = nonzero
            .iter()
            .zip(votes.iter())
            .filter(|(_, vote)| !self.is_outlier(vote.count(), active))
            .map(|(&i, _)| i)
            .collect();

        debug!(
            rows = nonzero.len(),
            removed = nonzero.len() - kept.len(),
            strategy = ?self.config.strategy,
            "outlier filter applied"
        );
        kept
    }

    /// Per-row detector flags over an already zero-free table.
    pub fn votes(&self, rows: &[Vec<f64>], target_col: usize) -> Vec<OutlierVote> {
        let n = rows.len();
        let scaled = StandardScaler::fit(rows).transform(rows);
        let target: Vec<f64> = rows.iter().map(|r| r[target_col]).collect();

        let per_method: Vec<(OutlierMethod, Vec<bool>)> = self
            .config
            .methods
            .iter()
            .map(|&method| {
                let flags = match method {
                    OutlierMethod::IsolationForest => self.isolation_forest(&scaled),
                    OutlierMethod::LocalOutlierFactor => self.local_outlier_factor(&scaled),
                    OutlierMethod::ModifiedZScore => modified_z_flags(&target, self.config.mad_threshold),
                    OutlierMethod::ZScore => z_flags(&target, self.config.z_threshold),
                };
                (method, flags)
            })
            .collect();

        (0..n)
            .map(|row| OutlierVote {
                flags: per_method.iter().map(|(m, f)| (*m, f[row])).collect(),
            })
            .collect()
    }

    fn is_outlier(&self, votes: usize, active: usize) -> bool {
        match self.config.strategy {
            VotingStrategy::Majority => votes as f64 >= active as f64 * self.config.voting_threshold,
            VotingStrategy::Unanimous => votes == active,
        }
    }

    fn isolation_forest(&self, rows: &[Vec<f64>]) -> Vec<bool> {
        let n = rows.len();
        let psi = n.min(MAX_TREE_SAMPLES);
        let depth_limit = (psi as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut depth_sums = vec![0.0; n];
        let trees = self.config.isolation_trees.max(1);
        for _ in 0..trees {
            let sample: Vec<usize> = (0..psi).map(|_| rng.gen_range(0..n)).collect();
            let tree = IsolationTree::grow(rows, sample, depth_limit, &mut rng);
            for (i, row) in rows.iter().enumerate() {
                depth_sums[i] += tree.path_length(row);
            }
        }

        let norm = average_path_length(psi).max(f64::EPSILON);
        let scores: Vec<f64> = depth_sums
            .iter()
            .map(|sum| 2f64.powf(-(sum / trees as f64) / norm))
            .collect();
        flag_upper_tail(&scores, self.config.contamination)
    }

    fn local_outlier_factor(&self, rows: &[Vec<f64>]) -> Vec<bool> {
        let n = rows.len();
        let k = self.config.max_neighbors.min(n.saturating_sub(1));
        if k == 0 {
            return vec![false; n];
        }

        let neighbours: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|i| {
                let mut dists: Vec<(usize, f64)> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| (j, euclidean(&rows[i], &rows[j])))
                    .collect();
                dists.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                dists.truncate(k);
                dists
            })
            .collect();

        let k_distance: Vec<f64> = neighbours.iter().map(|nb| nb[k - 1].1).collect();
        let lrd: Vec<f64> = neighbours
            .iter()
            .map(|nb| {
                let reach: f64 = nb.iter().map(|&(j, d)| d.max(k_distance[j])).sum::<f64>() / k as f64;
                1.0 / (reach + 1e-10)
            })
            .collect();
        let lof: Vec<f64> = neighbours
            .iter()
            .enumerate()
            .map(|(i, nb)| nb.iter().map(|&(j, _)| lrd[j]).sum::<f64>() / k as f64 / lrd[i])
            .collect();

        flag_upper_tail(&lof, self.config.contamination)
    }
}

enum IsolationNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

struct IsolationTree {
    nodes: Vec<IsolationNode>,
}

impl IsolationTree {
    fn grow(rows: &[Vec<f64>], sample: Vec<usize>, depth_limit: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.build(rows, sample, 0, depth_limit, rng);
        tree
    }

    fn build(
        &mut self,
        rows: &[Vec<f64>],
        sample: Vec<usize>,
        depth: usize,
        depth_limit: usize,
        rng: &mut StdRng,
    ) -> usize {
        let index = self.nodes.len();
        self.nodes.push(IsolationNode::Leaf { size: sample.len() });
        if sample.len() <= 1 || depth >= depth_limit {
            return index;
        }

        let width = rows[sample[0]].len();
        let splittable: Vec<(usize, f64, f64)> = (0..width)
            .filter_map(|f| {
                let (lo, hi) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(rows[i][f]), hi.max(rows[i][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return index;
        }

        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            sample.into_iter().partition(|&i| rows[i][feature] < threshold);

        let left = self.build(rows, left_rows, depth + 1, depth_limit, rng);
        let right = self.build(rows, right_rows, depth + 1, depth_limit, rng);
        self.nodes[index] = IsolationNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        index
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                IsolationNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                IsolationNode::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Flags scores strictly above the `1 - contamination` percentile.
fn flag_upper_tail(scores: &[f64], contamination: f64) -> Vec<bool> {
    let cutoff = percentile(scores, 1.0 - contamination.clamp(0.0, 1.0));
    scores.iter().map(|s| *s > cutoff).collect()
}

/// Linear-interpolated quantile, `q` in [0, 1].
pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub(crate) fn median(values: &[f64]) -> f64 {
    percentile(values, 0.5)
}

fn modified_z_flags(target: &[f64], threshold: f64) -> Vec<bool> {
    let med = median(target);
    let deviations: Vec<f64> = target.iter().map(|v| (v - med).abs()).collect();
    let mad = median(&deviations);
    if mad == 0.0 {
        return vec![false; target.len()];
    }
    target
        .iter()
        .map(|v| (0.6745 * (v - med) / mad).abs() > threshold)
        .collect()
}

fn z_flags(target: &[f64], threshold: f64) -> Vec<bool> {
    let n = target.len() as f64;
    let mean = target.iter().sum::<f64>() / n;
    let std = (target.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 {
        return vec![false; target.len()];
    }
    target.iter().map(|v| ((v - mean) / std).abs() > threshold).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100 regular rows plus 5 rows whose cost is inflated a hundredfold.
    fn contaminated_table() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut rows = Vec::new();
        for i in 1..=100 {
            let length = i as f64;
            let bridges = ((i * 7) % 13) as f64;
            let cost = 1000.0 + 10.0 * (i % 10) as f64;
            rows.push(vec![length, bridges, cost]);
        }
        let mut injected = Vec::new();
        for length in [10.0, 30.0, 50.0, 70.0, 90.0] {
            injected.push(rows.len());
            rows.push(vec![length, 3.0, 100_000.0]);
        }
        (rows, injected)
    }

    #[test]
    fn removes_injected_outliers_without_overfiltering() {
        let (rows, injected) = contaminated_table();
        let kept = OutlierFilter::default().retain_indices(&rows, 2);

        for idx in &injected {
            assert!(!kept.contains(idx), "row {} should be removed", idx);
        }
        let removed = rows.len() - kept.len();
        assert!(removed >= injected.len());
        assert!(removed as f64 <= rows.len() as f64 * 0.2, "removed {}", removed);
    }

    #[test]
    fn unanimous_is_never_stricter_than_majority() {
        let (rows, _) = contaminated_table();
        let majority = OutlierFilter::default().retain_indices(&rows, 2);
        let unanimous = OutlierFilter::new(OutlierConfig {
            strategy: VotingStrategy::Unanimous,
            ..OutlierConfig::default()
        })
        .retain_indices(&rows, 2);
        assert!(unanimous.len() >= majority.len());
    }

    #[test]
    fn zero_targets_dropped_and_small_tables_untouched() {
        let rows = vec![
            vec![1.0, 100.0],
            vec![2.0, 0.0],
            vec![3.0, 1e9],
            vec![4.0, 400.0],
        ];
        let kept = OutlierFilter::default().filter(&rows, 1);
        assert_eq!(kept, vec![vec![1.0, 100.0], vec![3.0, 1e9], vec![4.0, 400.0]]);
    }

    #[test]
    fn constant_target_is_not_flagged_by_robust_scores() {
        let target = vec![5.0; 12];
        assert!(modified_z_flags(&target, 3.5).iter().all(|f| !f));
        assert!(z_flags(&target, 3.0).iter().all(|f| !f));
    }

    #[test]
    fn votes_cover_every_active_method() {
        let (rows, _) = contaminated_table();
        let votes = OutlierFilter::default().votes(&rows, 2);
        assert_eq!(votes.len(), rows.len());
        assert!(votes.iter().all(|v| v.flags.len() == 4));
    }

    #[test]
    fn percentile_interpolates() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }

    #[test]
    fn path_length_correction_matches_known_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }
}
