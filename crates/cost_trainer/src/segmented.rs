//! Per-scope-type training of length-driven categories.

use crate::dataset::TrainingTable;
use crate::errors::Result;
use tracing::{debug, info, instrument, warn};
use vialcost_core::{
    CandidateModelSearch, CategoryModelBundle, CostError, FeatureSource, LogTransform, MetricsRow, OutlierConfig,
    OutlierFilter, RegressionMetrics, ScopedModel, SearchResult, TrainingConfig,
};

/// Index of the candidate with the highest composite score
/// `r2_weight · R² − mape_weight · MAPE / 100`.
pub fn best_by_composite<T, F>(candidates: &[T], metrics: F, r2_weight: f64, mape_weight: f64) -> Option<usize>
where
    F: Fn(&T) -> &RegressionMetrics,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let score = metrics(candidate).composite_score(r2_weight, mape_weight);
        if !score.is_finite() {
            continue;
        }
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Trains one model per scope type, each under every log transform.
#[derive(Debug, Clone)]
pub struct ScopeSegmentedTrainer {
    training: TrainingConfig,
    outliers: OutlierFilter,
}

impl ScopeSegmentedTrainer {
    pub fn new(training: TrainingConfig, outliers: OutlierConfig) -> Self {
        Self {
            training,
            outliers: OutlierFilter::new(outliers),
        }
    }

    /// Bundle of per-scope models for `category`.
    ///
    /// Scopes with fewer than `min_samples` clean rows get no entry; `None`
    /// when no scope type could be trained.
    #[instrument(skip_all, fields(category = %category))]
    pub fn train(
        &self,
        table: &TrainingTable,
        category: &str,
        predictors: &[FeatureSource],
    ) -> Result<Option<CategoryModelBundle>> {
        let mut bundle = CategoryModelBundle {
            predictors: predictors.to_vec(),
            models: Default::default(),
            metrics: Vec::new(),
        };

        for (scope, rows) in table.by_scope() {
            let mut x: Vec<Vec<f64>> = Vec::new();
            let mut y: Vec<f64> = Vec::new();
            for row in rows {
                let target = row.cost(category);
                if target > 0.0 && target.is_finite() {
                    x.push(row.features(predictors));
                    y.push(target);
                }
            }

            if y.len() > self.training.outlier_min_rows {
                let table: Vec<Vec<f64>> = x
                    .iter()
                    .zip(&y)
                    .map(|(r, t)| r.iter().copied().chain(std::iter::once(*t)).collect())
                    .collect();
                let keep = self.outliers.retain_indices(&table, predictors.len());
                x = keep.iter().map(|&i| x[i].clone()).collect();
                y = keep.iter().map(|&i| y[i]).collect();
            }

            if y.len() < self.training.min_samples {
                debug!(
                    scope = %scope,
                    samples = y.len(),
                    min_samples = self.training.min_samples,
                    "scope type left without a model"
                );
                continue;
            }

            match self.train_scope(&x, &y) {
                Ok(result) => {
                    info!(
                        scope = %scope,
                        family = %result.family(),
                        log_transform = %result.model.log_transform,
                        r2 = result.metrics.r2,
                        mape = result.metrics.mape,
                        samples = result.targets.len(),
                        "scope model selected"
                    );
                    bundle.metrics.push(MetricsRow::new(
                        category,
                        Some(&scope),
                        &result.model,
                        &result.metrics,
                        result.targets.len(),
                    ));
                    bundle.models.insert(scope, ScopedModel::new(result.model));
                }
                Err(err) if err.is_recoverable() || matches!(err, CostError::AllCandidatesFailed(_)) => {
                    warn!(scope = %scope, error = %err, "scope type skipped");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok((!bundle.models.is_empty()).then_some(bundle))
    }

    /// Search under every log transform and keep the best composite score.
    fn train_scope(&self, x: &[Vec<f64>], y: &[f64]) -> vialcost_core::Result<SearchResult> {
        let search = CandidateModelSearch::new(self.outliers.clone());
        let mut results = Vec::new();
        for mode in LogTransform::ALL {
            match search.search(x, y, mode, false) {
                Ok(result) => results.push(result),
                Err(err) => debug!(log_transform = %mode, error = %err, "log transform skipped"),
            }
        }

        let best = best_by_composite(
            &results,
            |r| &r.metrics,
            self.training.composite_r2_weight,
            self.training.composite_mape_weight,
        )
        .ok_or_else(|| CostError::AllCandidatesFailed("no log transform produced a model".to_string()))?;
        Ok(results.swap_remove(best))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TrainingRow;
    use std::collections::BTreeMap;
    use vialcost_core::{Attribute, SegmentAttributes};

    fn rows(scope: &str, data: &[(f64, f64)]) -> Vec<TrainingRow> {
        data.iter()
            .enumerate()
            .map(|(i, &(length_km, cost))| {
                let mut costs = BTreeMap::new();
                costs.insert("1 - TRANSPORTE".to_string(), cost);
                TrainingRow {
                    project_code: format!("{}-{}", scope, i),
                    segment: None,
                    scope_type: scope.to_string(),
                    attributes: SegmentAttributes {
                        length_km,
                        ..SegmentAttributes::default()
                    },
                    weights: SegmentAttributes::default(),
                    costs,
                }
            })
            .collect()
    }

    fn metrics(r2: f64, mape: f64) -> RegressionMetrics {
        RegressionMetrics {
            r2,
            mae: 0.0,
            rmse: 0.0,
            mape,
            median_ae: 0.0,
            max_error: 0.0,
            rmsle: None,
        }
    }

    #[test]
    fn composite_score_prefers_low_percentage_error() {
        let candidates = vec![metrics(0.95, 30.0), metrics(0.80, 5.0)];
        // 0.35 * 0.95 - 0.65 * 0.30 = 0.1375 ; 0.35 * 0.80 - 0.65 * 0.05 = 0.2475
        assert_eq!(best_by_composite(&candidates, |m| m, 0.35, 0.65), Some(1));
        assert_eq!(best_by_composite(&candidates, |m| m, 1.0, 0.0), Some(0));
        assert_eq!(best_by_composite::<RegressionMetrics, _>(&[], |m| m, 0.35, 0.65), None);
    }

    #[test]
    fn four_row_scope_produces_a_model() {
        let mut table = TrainingTable {
            rows: rows("Nuevo", &[(1.0, 100.0), (2.0, 200.0), (3.0, 295.0), (4.0, 410.0)]),
        };
        table.rows.extend(rows("Mejoramiento", &[(1.0, 80.0), (2.0, 150.0)]));

        let trainer = ScopeSegmentedTrainer::new(TrainingConfig::default(), OutlierConfig::default());
        let bundle = trainer
            .train(&table, "1 - TRANSPORTE", &[FeatureSource::Attribute(Attribute::LengthKm)])
            .unwrap()
            .expect("bundle for Nuevo");

        assert!(bundle.get("Nuevo").is_some());
        assert!(bundle.get("Mejoramiento").is_none(), "two rows must not yield a model");
        let row = bundle.metrics_for("Nuevo").unwrap();
        assert_eq!(row.sample_count, 4);
        assert!(row.r2 > 0.9, "r2 = {}", row.r2);
    }

    #[test]
    fn category_without_enough_rows_has_no_bundle() {
        let table = TrainingTable {
            rows: rows("Nuevo", &[(1.0, 100.0), (2.0, 0.0), (3.0, 300.0)]),
        };
        let trainer = ScopeSegmentedTrainer::new(TrainingConfig::default(), OutlierConfig::default());
        let bundle = trainer
            .train(&table, "1 - TRANSPORTE", &[FeatureSource::Attribute(Attribute::LengthKm)])
            .unwrap();
        assert!(bundle.is_none());
    }
}
