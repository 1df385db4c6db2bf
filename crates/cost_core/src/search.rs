//! Cross-validated candidate model search.
//!
//! Each candidate family carries a small hyperparameter grid. A family is
//! scored by out-of-fold predictions (leave-one-out by default) where every
//! training fold runs its own inner grid search, then refit on all rows with
//! the grid point chosen on the full data. Folds and grid points are
//! independent, so both loops run on the rayon pool.

use crate::artifact::FittedModel;
use crate::errors::{CostError, Result};
use crate::metrics::RegressionMetrics;
use crate::outliers::OutlierFilter;
use crate::regression::{KernelGamma, ModelFamily, ModelSpec, Pipeline};
use crate::transform::{FeatureExpansion, LogTransform};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A family with its hyperparameter grid.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFamily {
    pub family: ModelFamily,
    pub grid: Vec<ModelSpec>,
    /// Standardize features before fitting
    pub scaled: bool,
}

impl CandidateFamily {
    pub fn single(spec: ModelSpec, scaled: bool) -> Self {
        Self {
            family: spec.family(),
            grid: vec![spec],
            scaled,
        }
    }

    pub fn ridge(alphas: &[f64]) -> Self {
        Self {
            family: ModelFamily::Ridge,
            grid: alphas.iter().map(|&alpha| ModelSpec::Ridge { alpha }).collect(),
            scaled: true,
        }
    }

    pub fn bayesian_ridge() -> Self {
        let values = [1e-6, 1e-5, 1e-4];
        let mut grid = Vec::new();
        for &alpha_1 in &values {
            for &alpha_2 in &values {
                for &lambda_1 in &values {
                    for &lambda_2 in &values {
                        grid.push(ModelSpec::BayesianRidge {
                            alpha_1,
                            alpha_2,
                            lambda_1,
                            lambda_2,
                        });
                    }
                }
            }
        }
        Self {
            family: ModelFamily::BayesianRidge,
            grid,
            scaled: true,
        }
    }

    pub fn elastic_net() -> Self {
        let mut grid = Vec::new();
        for &alpha in &[0.01, 0.1, 1.0, 10.0] {
            for &l1_ratio in &[0.1, 0.3, 0.5, 0.7, 0.9] {
                grid.push(ModelSpec::ElasticNet {
                    alpha,
                    l1_ratio,
                    max_iter: 10_000,
                });
            }
        }
        Self {
            family: ModelFamily::ElasticNet,
            grid,
            scaled: true,
        }
    }

    pub fn svr(cs: &[f64], epsilons: &[f64], gammas: &[KernelGamma]) -> Self {
        let mut grid = Vec::new();
        for &c in cs {
            for &epsilon in epsilons {
                for &gamma in gammas {
                    grid.push(ModelSpec::Svr { c, epsilon, gamma });
                }
            }
        }
        Self {
            family: ModelFamily::Svr,
            grid,
            scaled: true,
        }
    }

    pub fn gaussian_process() -> Self {
        Self::single(
            ModelSpec::GaussianProcess {
                constant_bounds: (1e-3, 1e6),
                length_scale_bounds: (1e-6, 1e3),
            },
            true,
        )
    }

    /// Bayesian ridge, ridge, elastic net, RBF SVR and Gaussian process.
    pub fn standard_roster() -> Vec<CandidateFamily> {
        vec![
            Self::bayesian_ridge(),
            Self::ridge(&[0.01, 0.1, 1.0, 10.0, 100.0]),
            Self::elastic_net(),
            Self::svr(
                &[0.1, 1.0, 10.0, 100.0],
                &[0.01, 0.1, 0.5],
                &[KernelGamma::Scale, KernelGamma::Auto],
            ),
            Self::gaussian_process(),
        ]
    }
}

/// Concrete train/test splits.
#[derive(Debug, Clone, PartialEq)]
pub enum CrossValidation {
    LeaveOneOut,
    /// Contiguous, unshuffled folds; the first `n % k` folds get one extra row
    KFold { k: usize },
    /// Shuffled K-fold repeated with fresh permutations
    RepeatedKFold { k: usize, repeats: usize, seed: u64 },
}

impl CrossValidation {
    pub fn splits(&self, n: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
        match *self {
            CrossValidation::LeaveOneOut => (0..n)
                .map(|i| ((0..n).filter(|&j| j != i).collect(), vec![i]))
                .collect(),
            CrossValidation::KFold { k } => {
                let order: Vec<usize> = (0..n).collect();
                kfold_splits(&order, k)
            }
            CrossValidation::RepeatedKFold { k, repeats, seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut splits = Vec::new();
                for _ in 0..repeats {
                    let mut order: Vec<usize> = (0..n).collect();
                    order.shuffle(&mut rng);
                    splits.extend(kfold_splits(&order, k));
                }
                splits
            }
        }
    }
}

fn kfold_splits(order: &[usize], k: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let n = order.len();
    if k < 2 || k > n {
        return Vec::new();
    }
    let mut splits = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = n / k + usize::from(fold < n % k);
        let test: Vec<usize> = order[start..start + size].to_vec();
        let train: Vec<usize> = order[..start]
            .iter()
            .chain(&order[start + size..])
            .copied()
            .collect();
        splits.push((train, test));
        start += size;
    }
    splits
}

/// Chooses a [`CrossValidation`] for a given number of rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FoldRule {
    LeaveOneOut,
    /// `KFold { k: min(k, n) }`
    KFoldUpTo(usize),
    /// Repeated K-fold with `k = min(5, n / 2)` when `n >= 10`, leave-one-out below.
    /// `single_pass` keeps one repeat; otherwise there are as many repeats as folds.
    RepeatedOrLeaveOneOut { single_pass: bool, seed: u64 },
}

impl FoldRule {
    pub fn resolve(&self, n: usize) -> CrossValidation {
        match *self {
            FoldRule::LeaveOneOut => CrossValidation::LeaveOneOut,
            FoldRule::KFoldUpTo(k) => CrossValidation::KFold { k: k.min(n) },
            FoldRule::RepeatedOrLeaveOneOut { single_pass, seed } => {
                if n >= 10 {
                    let k = 5.min(n / 2);
                    CrossValidation::RepeatedKFold {
                        k,
                        repeats: if single_pass { 1 } else { k },
                        seed,
                    }
                } else {
                    CrossValidation::LeaveOneOut
                }
            }
        }
    }
}

/// Grid search objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridScoring {
    NegMeanSquaredError,
    NegRootMeanSquaredError,
}

/// How a family is validated: outer folds for the reported predictions,
/// inner folds for hyperparameter selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationPlan {
    pub outer: FoldRule,
    pub inner: FoldRule,
    pub scoring: GridScoring,
}

impl Default for EvaluationPlan {
    fn default() -> Self {
        Self {
            outer: FoldRule::LeaveOneOut,
            inner: FoldRule::KFoldUpTo(3),
            scoring: GridScoring::NegMeanSquaredError,
        }
    }
}

fn subset<T: Clone>(items: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| items[i].clone()).collect()
}

/// Best grid point of `family` on `(x, y)` under `cv`.
pub fn grid_search(
    family: &CandidateFamily,
    x: &[Vec<f64>],
    y: &[f64],
    cv: &CrossValidation,
    scoring: GridScoring,
) -> Result<ModelSpec> {
    let first = family
        .grid
        .first()
        .ok_or_else(|| CostError::InvalidInput(format!("{} has an empty grid", family.family)))?;
    let splits = cv.splits(x.len());
    if family.grid.len() == 1 || splits.is_empty() {
        return Ok(first.clone());
    }

    let scores: Vec<Option<f64>> = family
        .grid
        .par_iter()
        .map(|spec| {
            let mut fold_scores = Vec::with_capacity(splits.len());
            for (train, test) in &splits {
                let pipe = Pipeline::fit(spec, family.scaled, &subset(x, train), &subset(y, train)).ok()?;
                let preds = pipe.predict(&subset(x, test)).ok()?;
                let mse = test
                    .iter()
                    .zip(&preds)
                    .map(|(&i, p)| (y[i] - p).powi(2))
                    .sum::<f64>()
                    / test.len() as f64;
                fold_scores.push(match scoring {
                    GridScoring::NegMeanSquaredError => -mse,
                    GridScoring::NegRootMeanSquaredError => -mse.sqrt(),
                });
            }
            let mean = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
            mean.is_finite().then_some(mean)
        })
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.iter().enumerate() {
        if let Some(s) = score {
            if best.map_or(true, |(_, b)| *s > b) {
                best = Some((i, *s));
            }
        }
    }
    best.map(|(i, _)| family.grid[i].clone()).ok_or_else(|| {
        CostError::Numerical(format!("every {} grid point failed", family.family))
    })
}

/// Out-of-fold predictions, in the transformed target space. Rows covered by
/// several repeats receive the mean of their predictions.
pub fn out_of_fold_predictions(
    family: &CandidateFamily,
    x: &[Vec<f64>],
    y: &[f64],
    plan: &EvaluationPlan,
) -> Result<Vec<f64>> {
    let n = x.len();
    let splits = plan.outer.resolve(n).splits(n);
    if splits.is_empty() {
        return Err(CostError::InsufficientData { needed: 2, found: n });
    }

    let fold_results: Vec<Result<Vec<(usize, f64)>>> = splits
        .par_iter()
        .map(|(train, test)| {
            let xt = subset(x, train);
            let yt = subset(y, train);
            let inner = plan.inner.resolve(train.len());
            let spec = grid_search(family, &xt, &yt, &inner, plan.scoring)?;
            let pipe = Pipeline::fit(&spec, family.scaled, &xt, &yt)?;
            let preds = pipe.predict(&subset(x, test))?;
            Ok(test.iter().copied().zip(preds).collect())
        })
        .collect();

    let mut sums = vec![0.0; n];
    let mut counts = vec![0usize; n];
    for fold in fold_results {
        for (i, p) in fold? {
            sums[i] += p;
            counts[i] += 1;
        }
    }
    sums.iter()
        .zip(&counts)
        .map(|(s, &c)| {
            if c == 0 {
                Err(CostError::Numerical("row never appeared in a test fold".to_string()))
            } else {
                Ok(s / c as f64)
            }
        })
        .collect()
}

/// Cross-validated evaluation plus the refit of one family.
#[derive(Debug, Clone)]
pub struct FamilyEvaluation {
    pub family: ModelFamily,
    pub pipeline: Pipeline,
    /// Out-of-fold predictions on the original target scale
    pub predictions: Vec<f64>,
    pub metrics: RegressionMetrics,
}

/// Evaluate one family on transformed data and score it against `y_original`.
pub fn evaluate_family(
    family: &CandidateFamily,
    x: &[Vec<f64>],
    y: &[f64],
    y_original: &[f64],
    mode: LogTransform,
    plan: &EvaluationPlan,
    include_rmsle: bool,
) -> Result<FamilyEvaluation> {
    let predictions: Vec<f64> = out_of_fold_predictions(family, x, y, plan)?
        .into_iter()
        .map(|p| mode.inverse_target(p))
        .collect();
    let metrics = RegressionMetrics::compute(y_original, &predictions, include_rmsle)?;

    let inner = plan.inner.resolve(x.len());
    let spec = grid_search(family, x, y, &inner, plan.scoring)?;
    let pipeline = Pipeline::fit(&spec, family.scaled, x, y)?;

    Ok(FamilyEvaluation {
        family: family.family,
        pipeline,
        predictions,
        metrics,
    })
}

/// Metrics of one evaluated candidate, kept for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub family: ModelFamily,
    pub metrics: RegressionMetrics,
}

/// Winner of a search together with the data it was scored on.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Raw predictors of the rows that survived cleaning
    pub features: Vec<Vec<f64>>,
    /// Targets of those rows, original scale
    pub targets: Vec<f64>,
    /// Out-of-fold predictions of the winner, original scale
    pub predictions: Vec<f64>,
    pub model: FittedModel,
    pub metrics: RegressionMetrics,
    /// Every family that completed, best first
    pub candidates: Vec<CandidateSummary>,
}

impl SearchResult {
    pub fn family(&self) -> ModelFamily {
        self.model.family()
    }
}

/// Fits every family of a roster and keeps the best by (R² desc, MAPE asc).
#[derive(Debug, Clone)]
pub struct CandidateModelSearch {
    roster: Vec<CandidateFamily>,
    plan: EvaluationPlan,
    outliers: OutlierFilter,
    expansion: FeatureExpansion,
    include_rmsle: bool,
}

impl CandidateModelSearch {
    pub fn new(outliers: OutlierFilter) -> Self {
        Self {
            roster: CandidateFamily::standard_roster(),
            plan: EvaluationPlan::default(),
            outliers,
            expansion: FeatureExpansion::Identity,
            include_rmsle: false,
        }
    }

    pub fn with_roster(mut self, roster: Vec<CandidateFamily>) -> Self {
        self.roster = roster;
        self
    }

    pub fn with_plan(mut self, plan: EvaluationPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_expansion(mut self, expansion: FeatureExpansion) -> Self {
        self.expansion = expansion;
        self
    }

    pub fn with_rmsle(mut self, include: bool) -> Self {
        self.include_rmsle = include;
        self
    }

    pub fn roster(&self) -> &[CandidateFamily] {
        &self.roster
    }

    /// Clean, transform, cross-validate every family and return the winner.
    pub fn search(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        mode: LogTransform,
        apply_outlier_removal: bool,
    ) -> Result<SearchResult> {
        if x.len() != y.len() {
            return Err(CostError::InvalidInput(format!(
                "{} feature rows but {} targets",
                x.len(),
                y.len()
            )));
        }

        let mut keep: Vec<usize> = (0..y.len()).filter(|&i| y[i] > 0.0 && y[i].is_finite()).collect();
        if apply_outlier_removal && !keep.is_empty() {
            let width = x[keep[0]].len();
            let table: Vec<Vec<f64>> = keep
                .iter()
                .map(|&i| x[i].iter().copied().chain(std::iter::once(y[i])).collect())
                .collect();
            keep = self
                .outliers
                .retain_indices(&table, width)
                .into_iter()
                .map(|j| keep[j])
                .collect();
        }
        if keep.len() < 2 {
            return Err(CostError::InsufficientData {
                needed: 2,
                found: keep.len(),
            });
        }

        let features = subset(x, &keep);
        let targets = subset(y, &keep);
        let xt = mode.forward_rows(&self.expansion.expand_rows(&features));
        let yt: Vec<f64> = targets.iter().map(|v| mode.forward_target(*v)).collect();

        let mut evaluations: Vec<FamilyEvaluation> = Vec::new();
        for family in &self.roster {
            match evaluate_family(family, &xt, &yt, &targets, mode, &self.plan, self.include_rmsle) {
                Ok(eval) => {
                    debug!(
                        family = %eval.family,
                        log_transform = %mode,
                        r2 = eval.metrics.r2,
                        mape = eval.metrics.mape,
                        "candidate evaluated"
                    );
                    evaluations.push(eval);
                }
                Err(err) => warn!(family = %family.family, log_transform = %mode, error = %err, "candidate skipped"),
            }
        }

        evaluations.sort_by(|a, b| {
            b.metrics
                .r2
                .total_cmp(&a.metrics.r2)
                .then(a.metrics.mape.total_cmp(&b.metrics.mape))
        });
        let candidates: Vec<CandidateSummary> = evaluations
            .iter()
            .map(|e| CandidateSummary {
                family: e.family,
                metrics: e.metrics.clone(),
            })
            .collect();

        let best = evaluations.into_iter().next().ok_or_else(|| {
            CostError::AllCandidatesFailed(format!("{} families, log transform {}", self.roster.len(), mode))
        })?;

        Ok(SearchResult {
            features,
            targets,
            predictions: best.predictions,
            model: FittedModel {
                pipeline: best.pipeline,
                log_transform: mode,
                expansion: self.expansion,
            },
            metrics: best.metrics,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nuevo() -> (Vec<Vec<f64>>, Vec<f64>) {
        (
            vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]],
            vec![100.0, 200.0, 295.0, 410.0],
        )
    }

    #[test]
    fn kfold_matches_contiguous_layout() {
        let splits = CrossValidation::KFold { k: 3 }.splits(7);
        let tests: Vec<Vec<usize>> = splits.iter().map(|(_, t)| t.clone()).collect();
        assert_eq!(tests, vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]);
        assert!(CrossValidation::KFold { k: 3 }.splits(2).is_empty());
    }

    #[test]
    fn repeated_kfold_covers_each_row_once_per_repeat() {
        let splits = CrossValidation::RepeatedKFold { k: 5, repeats: 3, seed: 42 }.splits(12);
        assert_eq!(splits.len(), 15);
        let mut counts = vec![0; 12];
        for (_, test) in &splits {
            for &i in test {
                counts[i] += 1;
            }
        }
        assert!(counts.iter().all(|&c| c == 3));
    }

    #[test]
    fn fold_rule_switches_at_ten_rows() {
        let rule = FoldRule::RepeatedOrLeaveOneOut { single_pass: false, seed: 42 };
        assert_eq!(rule.resolve(9), CrossValidation::LeaveOneOut);
        assert_eq!(
            rule.resolve(12),
            CrossValidation::RepeatedKFold { k: 5, repeats: 5, seed: 42 }
        );
        assert_eq!(FoldRule::KFoldUpTo(3).resolve(2), CrossValidation::KFold { k: 2 });
    }

    #[test]
    fn standard_roster_grid_sizes() {
        let roster = CandidateFamily::standard_roster();
        let sizes: Vec<usize> = roster.iter().map(|f| f.grid.len()).collect();
        assert_eq!(sizes, vec![81, 5, 20, 24, 1]);
    }

    #[test]
    fn grid_search_prefers_small_ridge_penalty_on_clean_line() {
        let x: Vec<Vec<f64>> = (0..9).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..9).map(|i| 5.0 * i as f64 + 1.0).collect();
        let family = CandidateFamily::ridge(&[0.01, 100.0]);
        let spec = grid_search(&family, &x, &y, &CrossValidation::KFold { k: 3 }, GridScoring::NegMeanSquaredError).unwrap();
        assert_eq!(spec, ModelSpec::Ridge { alpha: 0.01 });
    }

    #[test]
    fn search_scores_nuevo_scope_well() {
        let (x, y) = nuevo();
        let search = CandidateModelSearch::new(OutlierFilter::default())
            .with_roster(vec![CandidateFamily::single(ModelSpec::Linear, true), CandidateFamily::ridge(&[0.01, 0.1, 1.0])]);
        let result = search.search(&x, &y, LogTransform::None, false).unwrap();
        assert!(result.metrics.r2 > 0.9, "r2 = {}", result.metrics.r2);
        assert_eq!(result.predictions.len(), 4);
        assert_eq!(result.candidates.len(), 2);
        let pred = result.model.predict_one(&[2.5]).unwrap();
        assert!(pred > 200.0 && pred < 295.0);
    }

    #[test]
    fn candidates_are_ranked_by_r2() {
        let (x, y) = nuevo();
        let result = CandidateModelSearch::new(OutlierFilter::default())
            .search(&x, &y, LogTransform::Output, false)
            .unwrap();
        for pair in result.candidates.windows(2) {
            assert!(pair[0].metrics.r2 >= pair[1].metrics.r2);
        }
        assert_eq!(result.metrics, result.candidates[0].metrics);
    }

    #[test]
    fn non_positive_targets_are_dropped() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let y = vec![10.0, 0.0, -5.0, 40.0];
        let result = CandidateModelSearch::new(OutlierFilter::default())
            .with_roster(vec![CandidateFamily::single(ModelSpec::Linear, true)])
            .search(&x, &y, LogTransform::None, false)
            .unwrap();
        assert_eq!(result.targets, vec![10.0, 40.0]);
    }

    #[test]
    fn single_surviving_row_is_insufficient() {
        let err = CandidateModelSearch::new(OutlierFilter::default())
            .search(&[vec![1.0], vec![2.0]], &[5.0, 0.0], LogTransform::None, false)
            .unwrap_err();
        assert!(matches!(err, CostError::InsufficientData { found: 1, .. }));
    }

    #[test]
    fn failing_roster_reports_all_candidates_failed() {
        let empty_grid = CandidateFamily {
            family: ModelFamily::Ridge,
            grid: Vec::new(),
            scaled: true,
        };
        let (x, y) = nuevo();
        let err = CandidateModelSearch::new(OutlierFilter::default())
            .with_roster(vec![empty_grid])
            .search(&x, &y, LogTransform::None, false)
            .unwrap_err();
        assert!(matches!(err, CostError::AllCandidatesFailed(_)));
    }
}
