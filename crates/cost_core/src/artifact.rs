//! Trained model bundles and the per-phase artifact that owns them.

use crate::catalog::{canonical_name, Attribute, FeatureSource, Phase};
use crate::errors::Result;
use crate::metrics::RegressionMetrics;
use crate::regression::{ModelFamily, Pipeline};
use crate::serialization::canonical_hash;
use crate::transform::{FeatureExpansion, LogTransform};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A fitted pipeline together with the transforms it was trained under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub pipeline: Pipeline,
    pub log_transform: LogTransform,
    #[serde(default)]
    pub expansion: FeatureExpansion,
}

impl FittedModel {
    pub fn family(&self) -> ModelFamily {
        self.pipeline.family()
    }

    /// Predict one row of raw predictor values, back on the original cost scale.
    pub fn predict_one(&self, raw: &[f64]) -> Result<f64> {
        let row = self.log_transform.forward_row(&self.expansion.expand(raw));
        let value = self.pipeline.predict_row(&row)?;
        Ok(self.log_transform.inverse_target(value))
    }
}

/// One line of the training summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRow {
    pub category: String,
    /// `None` for categories that are not segmented by scope type
    pub scope_type: Option<String>,
    pub model_family: ModelFamily,
    pub r2: f64,
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rmsle: Option<f64>,
    pub sample_count: usize,
    pub log_transform: LogTransform,
}

impl MetricsRow {
    pub fn new(
        category: &str,
        scope_type: Option<&str>,
        model: &FittedModel,
        metrics: &RegressionMetrics,
        sample_count: usize,
    ) -> Self {
        Self {
            category: category.to_string(),
            scope_type: scope_type.map(str::to_string),
            model_family: model.family(),
            r2: metrics.r2,
            mae: metrics.mae,
            rmse: metrics.rmse,
            mape: metrics.mape,
            rmsle: metrics.rmsle,
            sample_count,
            log_transform: model.log_transform,
        }
    }
}

/// Winning model for one scope type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedModel {
    pub model: FittedModel,
    pub log_transform: LogTransform,
}

impl ScopedModel {
    pub fn new(model: FittedModel) -> Self {
        let log_transform = model.log_transform;
        Self { model, log_transform }
    }
}

/// Per-scope models of one category.
///
/// Scope types missing from `models` had too few rows to train; callers must
/// treat that as "no prediction available", never as zero cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryModelBundle {
    pub predictors: Vec<FeatureSource>,
    pub models: BTreeMap<String, ScopedModel>,
    pub metrics: Vec<MetricsRow>,
}

impl CategoryModelBundle {
    /// Model for a scope type, matched on the canonical spelling.
    pub fn get(&self, scope_type: &str) -> Option<&ScopedModel> {
        let key = canonical_name(scope_type);
        self.models
            .iter()
            .find(|(scope, _)| canonical_name(scope) == key)
            .map(|(_, m)| m)
    }

    pub fn scope_types(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn metrics_for(&self, scope_type: &str) -> Option<&MetricsRow> {
        let key = canonical_name(scope_type);
        self.metrics
            .iter()
            .find(|row| row.scope_type.as_deref().map(canonical_name).as_deref() == Some(key.as_str()))
    }
}

/// A category trained as one model over all scope types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleModel {
    pub predictors: Vec<FeatureSource>,
    pub model: FittedModel,
    pub metrics: MetricsRow,
    /// Segments where this attribute is zero get no prediction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryArtifact {
    Segmented(CategoryModelBundle),
    Single(SingleModel),
}

impl CategoryArtifact {
    pub fn metrics(&self) -> Vec<MetricsRow> {
        match self {
            CategoryArtifact::Segmented(bundle) => bundle.metrics.clone(),
            CategoryArtifact::Single(single) => vec![single.metrics.clone()],
        }
    }

    pub fn predictors(&self) -> &[FeatureSource] {
        match self {
            CategoryArtifact::Segmented(bundle) => &bundle.predictors,
            CategoryArtifact::Single(single) => &single.predictors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub phase: Phase,
    /// Training rows after dataset assembly
    pub sample_count: usize,
    pub trained_at: DateTime<Utc>,
    pub present_year: i32,
    pub crate_version: String,
}

/// Every trained category of one phase. Replaced wholesale on retrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseModelArtifact {
    pub models: BTreeMap<String, CategoryArtifact>,
    pub metadata: ArtifactMetadata,
    pub summary: Vec<MetricsRow>,
}

impl PhaseModelArtifact {
    pub fn new(phase: Phase, sample_count: usize, present_year: i32) -> Self {
        Self {
            models: BTreeMap::new(),
            metadata: ArtifactMetadata {
                phase,
                sample_count,
                trained_at: Utc::now(),
                present_year,
                crate_version: crate::VERSION.to_string(),
            },
            summary: Vec::new(),
        }
    }

    /// Add a trained category and append its metrics to the summary.
    pub fn insert(&mut self, category: &str, artifact: CategoryArtifact) {
        self.summary.extend(artifact.metrics());
        self.models.insert(category.to_string(), artifact);
    }

    pub fn model(&self, category: &str) -> Option<&CategoryArtifact> {
        let key = canonical_name(category);
        self.models
            .iter()
            .find(|(name, _)| canonical_name(name) == key)
            .map(|(_, m)| m)
    }

    pub fn contains(&self, category: &str) -> bool {
        self.model(category).is_some()
    }

    /// BLAKE3 digest of the canonical JSON form.
    pub fn content_hash(&self) -> Result<String> {
        canonical_hash(self).map_err(Into::into)
    }
}
