//! Category-specific training paths that bypass scope segmentation.

use crate::dataset::TrainingTable;
use crate::errors::Result;
use crate::synthetic;
use tracing::{debug, info, instrument, warn};
use vialcost_core::{
    Attribute, CandidateFamily, CandidateModelSearch, ChainedEstimator, CostError, EvaluationPlan, FeatureExpansion,
    FeatureSource, FittedModel, FoldRule, GridScoring, KernelGamma, LogTransform, MetricsRow, ModelSpec,
    OutlierConfig, OutlierFilter, Pipeline, RegressionMetrics, SearchResult, SingleModel, TrainingConfig,
};

/// Attributes that mark a project as having structures at all.
const STRUCTURE_ATTRIBUTES: [Attribute; 6] = [
    Attribute::VehicularBridgeCount,
    Attribute::VehicularBridgeAreaM2,
    Attribute::PedestrianBridgeCount,
    Attribute::PedestrianBridgeAreaM2,
    Attribute::TunnelCount,
    Attribute::TunnelKm,
];

const MULTI_PREDICTOR_ALPHAS: [f64; 5] = [0.01, 0.1, 1.0, 10.0, 100.0];
const CHAINED_SVR_C: [f64; 5] = [5.0, 10.0, 80.0, 200.0, 1000.0];
const CHAINED_SVR_EPSILON: [f64; 1] = [0.01];
const CHAINED_SVR_GAMMA: [KernelGamma; 5] = [
    KernelGamma::Scale,
    KernelGamma::Auto,
    KernelGamma::Value(0.01),
    KernelGamma::Value(0.1),
    KernelGamma::Value(1.0),
];

/// Filters applied when rows are summed per project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectGrouping {
    /// Only projects where this attribute is positive; without one, any structure quantity
    pub require_positive: Option<Attribute>,
    pub excluded_projects: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SpecializedTrainer {
    training: TrainingConfig,
    outliers: OutlierFilter,
}

impl SpecializedTrainer {
    pub fn new(training: TrainingConfig, outliers: OutlierConfig) -> Self {
        Self {
            training,
            outliers: OutlierFilter::new(outliers),
        }
    }

    /// Least squares over project totals, evaluated leave-one-out.
    #[instrument(skip_all, fields(category = %category))]
    pub fn train_grouped(
        &self,
        table: &TrainingTable,
        category: &str,
        predictors: &[FeatureSource],
        log_target: bool,
        scaled: bool,
        grouping: &ProjectGrouping,
    ) -> Result<Option<SingleModel>> {
        let (x, y) = self.grouped_rows(table, category, predictors, grouping);
        let search = CandidateModelSearch::new(self.outliers.clone())
            .with_roster(vec![CandidateFamily::single(ModelSpec::Linear, scaled)])
            .with_plan(leave_one_out());
        let mode = if log_target { LogTransform::Output } else { LogTransform::None };
        self.finish(category, predictors, self.search(&search, &x, &y, mode)?)
    }

    /// Fit on real rows plus interpolated synthetic rows, scored on the real rows only.
    #[instrument(skip_all, fields(category = %category))]
    pub fn train_synthetic(
        &self,
        table: &TrainingTable,
        category: &str,
        predictors: [Attribute; 2],
        gate: Attribute,
    ) -> Result<Option<SingleModel>> {
        let mut real_x: Vec<[f64; 2]> = Vec::new();
        let mut real_y: Vec<f64> = Vec::new();
        for row in &table.rows {
            let target = row.cost(category);
            if target > 0.0 && target.is_finite() {
                real_x.push([row.attributes.get(predictors[0]), row.attributes.get(predictors[1])]);
                real_y.push(target);
            }
        }
        if real_y.len() < self.training.min_samples {
            info!(samples = real_y.len(), "too few real samples for synthetic augmentation");
            return Ok(None);
        }

        let (synth_x, synth_y) =
            synthetic::interpolate(&real_x, &real_y, self.training.synthetic_samples, self.training.seed);
        debug!(real = real_y.len(), synthetic = synth_y.len(), "augmented training set");

        let expansion = FeatureExpansion::AppendLog1p;
        let mode = LogTransform::Output;
        let rows: Vec<Vec<f64>> = real_x.iter().chain(&synth_x).map(|r| expansion.expand(r)).collect();
        let targets: Vec<f64> = real_y
            .iter()
            .chain(&synth_y)
            .map(|v| mode.forward_target(*v))
            .collect();

        let model = FittedModel {
            pipeline: Pipeline::fit(&ModelSpec::Linear, true, &rows, &targets)?,
            log_transform: mode,
            expansion,
        };
        let predictions: Vec<f64> = real_x
            .iter()
            .map(|r| model.predict_one(r))
            .collect::<vialcost_core::Result<_>>()?;
        let metrics = RegressionMetrics::compute(&real_y, &predictions, false)?;
        info!(r2 = metrics.r2, mape = metrics.mape, samples = real_y.len(), "synthetic model fitted");

        Ok(Some(SingleModel {
            predictors: predictors.iter().map(|a| FeatureSource::Attribute(*a)).collect(),
            metrics: MetricsRow::new(category, None, &model, &metrics, real_y.len()),
            model,
            gate: Some(gate),
        }))
    }

    /// Model whose predictors are other categories' costs.
    #[instrument(skip_all, fields(category = %category, estimator = ?estimator))]
    pub fn train_chained(
        &self,
        table: &TrainingTable,
        category: &str,
        predictors: &[FeatureSource],
        estimator: ChainedEstimator,
        grouping: Option<&ProjectGrouping>,
    ) -> Result<Option<SingleModel>> {
        match estimator {
            ChainedEstimator::Linear => match grouping {
                Some(grouping) => self.train_grouped(table, category, predictors, true, true, grouping),
                None => {
                    let (x, y) = positive_rows(table, category, predictors);
                    let search = CandidateModelSearch::new(self.outliers.clone())
                        .with_roster(vec![CandidateFamily::single(ModelSpec::Linear, true)])
                        .with_plan(leave_one_out());
                    self.finish(category, predictors, self.search(&search, &x, &y, LogTransform::Output)?)
                }
            },
            ChainedEstimator::Svr => {
                let (x, y) = match grouping {
                    Some(grouping) => self.grouped_rows(table, category, predictors, grouping),
                    None => positive_rows(table, category, predictors),
                };
                let seed = self.training.seed;
                let search = CandidateModelSearch::new(self.outliers.clone())
                    .with_roster(vec![CandidateFamily::svr(
                        &CHAINED_SVR_C,
                        &CHAINED_SVR_EPSILON,
                        &CHAINED_SVR_GAMMA,
                    )])
                    .with_plan(EvaluationPlan {
                        outer: FoldRule::RepeatedOrLeaveOneOut { single_pass: true, seed },
                        inner: FoldRule::RepeatedOrLeaveOneOut { single_pass: false, seed },
                        scoring: GridScoring::NegRootMeanSquaredError,
                    })
                    .with_expansion(FeatureExpansion::AppendLog1p)
                    .with_rmsle(true);
                self.finish(category, predictors, self.search(&search, &x, &y, LogTransform::Output)?)
            }
        }
    }

    /// Ridge over several raw predictors without scope segmentation.
    #[instrument(skip_all, fields(category = %category))]
    pub fn train_multi_predictor(
        &self,
        table: &TrainingTable,
        category: &str,
        predictors: &[FeatureSource],
        log_target: bool,
    ) -> Result<Option<SingleModel>> {
        let (x, y) = positive_rows(table, category, predictors);
        let search = CandidateModelSearch::new(self.outliers.clone())
            .with_roster(vec![CandidateFamily::ridge(&MULTI_PREDICTOR_ALPHAS)])
            .with_plan(leave_one_out());
        let mode = if log_target { LogTransform::Output } else { LogTransform::None };
        self.finish(category, predictors, self.search(&search, &x, &y, mode)?)
    }

    fn grouped_rows(
        &self,
        table: &TrainingTable,
        category: &str,
        predictors: &[FeatureSource],
        grouping: &ProjectGrouping,
    ) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x: Vec<Vec<f64>> = Vec::new();
        let mut y: Vec<f64> = Vec::new();
        for project in table.by_project() {
            if grouping.excluded_projects.iter().any(|code| *code == project.project_code) {
                continue;
            }
            let has_structures = match grouping.require_positive {
                Some(attribute) => project.attributes.get(attribute) > 0.0,
                None => STRUCTURE_ATTRIBUTES.iter().any(|a| project.attributes.get(*a) > 0.0),
            };
            let target = project.cost(category);
            let features = project.features(predictors);
            if has_structures && target > 0.0 && features.iter().all(|v| *v > 0.0) {
                x.push(features);
                y.push(target);
            }
        }

        let table: Vec<Vec<f64>> = x
            .iter()
            .zip(&y)
            .map(|(r, t)| r.iter().copied().chain(std::iter::once(*t)).collect())
            .collect();
        let keep = self.outliers.retain_indices(&table, predictors.len());
        debug!(projects = y.len(), kept = keep.len(), "project rows grouped");
        (
            keep.iter().map(|&i| x[i].clone()).collect(),
            keep.iter().map(|&i| y[i]).collect(),
        )
    }

    /// Run a search once the minimum sample count is met; recoverable
    /// failures become `None`.
    fn search(
        &self,
        search: &CandidateModelSearch,
        x: &[Vec<f64>],
        y: &[f64],
        mode: LogTransform,
    ) -> Result<Option<SearchResult>> {
        if y.len() < self.training.min_samples {
            info!(samples = y.len(), min_samples = self.training.min_samples, "not enough samples to train");
            return Ok(None);
        }
        match search.search(x, y, mode, false) {
            Ok(result) => Ok(Some(result)),
            Err(err) if err.is_recoverable() || matches!(err, CostError::AllCandidatesFailed(_)) => {
                warn!(error = %err, "category left without a model");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn finish(
        &self,
        category: &str,
        predictors: &[FeatureSource],
        result: Option<SearchResult>,
    ) -> Result<Option<SingleModel>> {
        let Some(result) = result else {
            return Ok(None);
        };
        info!(
            family = %result.family(),
            log_transform = %result.model.log_transform,
            r2 = result.metrics.r2,
            mape = result.metrics.mape,
            samples = result.targets.len(),
            "category model fitted"
        );
        Ok(Some(SingleModel {
            predictors: predictors.to_vec(),
            metrics: MetricsRow::new(category, None, &result.model, &result.metrics, result.targets.len()),
            model: result.model,
            gate: None,
        }))
    }
}

fn leave_one_out() -> EvaluationPlan {
    EvaluationPlan {
        outer: FoldRule::LeaveOneOut,
        ..EvaluationPlan::default()
    }
}

fn positive_rows(table: &TrainingTable, category: &str, predictors: &[FeatureSource]) -> (Vec<Vec<f64>>, Vec<f64>) {
    table
        .rows
        .iter()
        .filter(|row| row.cost(category) > 0.0)
        .map(|row| (row.features(predictors), row.cost(category)))
        .unzip()
}
