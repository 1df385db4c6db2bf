//! Phase-level training plan.
//!
//! Walks the phase catalog in dependency order and trains every modeled
//! category with the strategy the catalog assigns to it. Rollups and
//! unmodeled categories are skipped; chained categories only train once all
//! of their upstream categories made it into the artifact.

use crate::dataset::TrainingTable;
use crate::errors::{Result, TrainerError};
use crate::segmented::ScopeSegmentedTrainer;
use crate::specialized::{ProjectGrouping, SpecializedTrainer};
use tracing::{info, instrument, warn};
use vialcost_core::{CategoryArtifact, CategoryStrategy, CostConfig, Phase, PhaseModelArtifact};

/// Trains the full artifact of one phase.
pub struct PhaseTrainer {
    config: CostConfig,
    segmented: ScopeSegmentedTrainer,
    specialized: SpecializedTrainer,
}

impl PhaseTrainer {
    pub fn new(config: CostConfig) -> Self {
        let segmented = ScopeSegmentedTrainer::new(config.training.clone(), config.outliers.clone());
        let specialized = SpecializedTrainer::new(config.training.clone(), config.outliers.clone());
        Self {
            config,
            segmented,
            specialized,
        }
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    #[instrument(skip_all, fields(phase = %phase, rows = table.len()))]
    pub fn train(&self, phase: Phase, table: &TrainingTable) -> Result<PhaseModelArtifact> {
        if table.is_empty() {
            return Err(TrainerError::Dataset(format!("no training rows for phase {}", phase)));
        }

        let catalog = phase.catalog();
        let mut artifact = PhaseModelArtifact::new(phase, table.len(), self.config.training.present_year);

        for spec in catalog.resolution_order()? {
            let Some(strategy) = spec.strategy() else {
                continue;
            };

            let missing: Vec<String> = strategy
                .upstream()
                .into_iter()
                .filter(|name| !artifact.contains(name))
                .collect();
            if !missing.is_empty() {
                warn!(category = %spec.name, missing = ?missing, "upstream categories untrained; skipping");
                continue;
            }

            match self.train_category(table, &spec.name, strategy)? {
                Some(trained) => artifact.insert(&spec.name, trained),
                None => info!(category = %spec.name, strategy = strategy.kind(), "no model trained"),
            }
        }

        info!(
            categories = artifact.models.len(),
            summary_rows = artifact.summary.len(),
            "phase training finished"
        );
        Ok(artifact)
    }

    fn train_category(
        &self,
        table: &TrainingTable,
        category: &str,
        strategy: &CategoryStrategy,
    ) -> Result<Option<CategoryArtifact>> {
        let trained = match strategy {
            CategoryStrategy::ScopeSegmented { predictors } => self
                .segmented
                .train(table, category, predictors)?
                .map(CategoryArtifact::Segmented),
            CategoryStrategy::GroupedByProject {
                predictors,
                log_target,
                scaled,
                require_positive,
                excluded_projects,
            } => {
                let grouping = ProjectGrouping {
                    require_positive: *require_positive,
                    excluded_projects: excluded_projects.clone(),
                };
                self.specialized
                    .train_grouped(table, category, predictors, *log_target, *scaled, &grouping)?
                    .map(CategoryArtifact::Single)
            }
            CategoryStrategy::SyntheticAugmented { predictors, gate } => self
                .specialized
                .train_synthetic(table, category, *predictors, *gate)?
                .map(CategoryArtifact::Single),
            CategoryStrategy::Chained {
                predictors,
                estimator,
                grouped_by_project,
                require_positive,
            } => {
                let grouping = grouped_by_project.then(|| ProjectGrouping {
                    require_positive: *require_positive,
                    excluded_projects: Vec::new(),
                });
                self.specialized
                    .train_chained(table, category, predictors, *estimator, grouping.as_ref())?
                    .map(CategoryArtifact::Single)
            }
            CategoryStrategy::MultiPredictor { predictors, log_target } => self
                .specialized
                .train_multi_predictor(table, category, predictors, *log_target)?
                .map(CategoryArtifact::Single),
        };
        Ok(trained)
    }
}
