//! Inference over a trained phase artifact.
//!
//! Categories are resolved in the catalog's dependency order so that chained
//! categories see their upstream predictions and rollups see their children.
//! A category that cannot be predicted yields `None` with a status explaining
//! why; that is never folded into a zero-cost prediction.
//!
//! Rollup rule: a parent is the sum of its children with missing children
//! counted as zero, and the parent is flagged `incomplete` when any child was
//! missing.

use crate::artifact::{CategoryArtifact, PhaseModelArtifact};
use crate::catalog::{canonical_name, item_order, CategoryRole, FeatureSource, Phase, PhaseCatalog, SegmentAttributes};
use crate::errors::{CostError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One segment to price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInput {
    /// Optional caller label echoed back in the result
    #[serde(default)]
    pub name: Option<String>,
    pub scope_type: String,
    #[serde(flatten)]
    pub attributes: SegmentAttributes,
}

/// Why a category has (or lacks) a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionStatus {
    Predicted,
    /// The category has no model for this scope type
    NoModelForScope,
    /// A chained category whose upstream predictions are missing
    MissingUpstream { missing: Vec<String> },
    /// The gating attribute is zero, e.g. no tunnels in the segment
    NotApplicable,
    /// Modeled category absent from the artifact
    NotTrained,
    /// Category has no predictive model in this phase
    NotModeled,
    /// The model rejected the input
    Failed { reason: String },
    /// Sum of children
    Rollup { incomplete: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub category: String,
    pub value: Option<f64>,
    #[serde(flatten)]
    pub status: PredictionStatus,
    /// Cross-validated R² of the model that produced the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPrediction {
    pub name: Option<String>,
    pub scope_type: String,
    pub length_km: f64,
    /// Ordered by item number
    pub categories: Vec<CategoryPrediction>,
    /// Sum of every non-rollup value
    pub total: f64,
    pub cost_per_km: f64,
}

impl SegmentPrediction {
    pub fn get(&self, category: &str) -> Option<&CategoryPrediction> {
        let key = canonical_name(category);
        self.categories.iter().find(|c| canonical_name(&c.category) == key)
    }

    pub fn value(&self, category: &str) -> Option<f64> {
        self.get(category).and_then(|c| c.value)
    }

    /// `category → value`, `None` meaning no prediction is available.
    pub fn values(&self) -> BTreeMap<String, Option<f64>> {
        self.categories
            .iter()
            .map(|c| (c.category.clone(), c.value))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEstimate {
    pub phase: Phase,
    pub segments: Vec<SegmentPrediction>,
    /// Per-category sum over segments, missing values counted as zero
    pub category_totals: BTreeMap<String, f64>,
    pub total: f64,
    pub total_length_km: f64,
    pub cost_per_km: f64,
    /// Mean R² of every model that contributed a value
    pub confidence: Option<f64>,
}

fn per_km(total: f64, length_km: f64) -> f64 {
    if length_km > 0.0 {
        total / length_km
    } else {
        0.0
    }
}

/// Applies a phase artifact to segments.
#[derive(Debug, Clone)]
pub struct InferenceOrchestrator {
    catalog: PhaseCatalog,
    artifact: PhaseModelArtifact,
}

impl InferenceOrchestrator {
    pub fn new(artifact: PhaseModelArtifact) -> Self {
        let catalog = artifact.metadata.phase.catalog();
        Self { catalog, artifact }
    }

    pub fn phase(&self) -> Phase {
        self.catalog.phase
    }

    pub fn artifact(&self) -> &PhaseModelArtifact {
        &self.artifact
    }

    pub fn catalog(&self) -> &PhaseCatalog {
        &self.catalog
    }

    /// Predict every category of the phase for one segment.
    pub fn predict(&self, input: &SegmentInput) -> Result<SegmentPrediction> {
        input.attributes.validate()?;
        if input.scope_type.trim().is_empty() {
            return Err(CostError::InvalidInput("scope type is required".to_string()));
        }

        let mut resolved: BTreeMap<String, Option<f64>> = BTreeMap::new();
        let mut predictions: Vec<CategoryPrediction> = Vec::new();

        for spec in self.catalog.resolution_order()? {
            let prediction = match &spec.role {
                CategoryRole::Unmodeled => absent(&spec.name, PredictionStatus::NotModeled),
                CategoryRole::Rollup { children } => {
                    let values: Vec<Option<f64>> = children
                        .iter()
                        .map(|child| resolved.get(&canonical_name(child)).copied().flatten())
                        .collect();
                    CategoryPrediction {
                        category: spec.name.clone(),
                        value: Some(values.iter().map(|v| v.unwrap_or(0.0)).sum()),
                        status: PredictionStatus::Rollup {
                            incomplete: values.iter().any(Option::is_none),
                        },
                        r2: None,
                    }
                }
                CategoryRole::Modeled(_) => self.predict_modeled(&spec.name, input, &resolved),
            };
            debug!(category = %prediction.category, value = ?prediction.value, status = ?prediction.status, "category resolved");
            resolved.insert(canonical_name(&spec.name), prediction.value);
            predictions.push(prediction);
        }

        predictions.sort_by_key(|p| item_order(&p.category));
        let total = predictions
            .iter()
            .filter(|p| !matches!(p.status, PredictionStatus::Rollup { .. }))
            .filter_map(|p| p.value)
            .sum();

        Ok(SegmentPrediction {
            name: input.name.clone(),
            scope_type: input.scope_type.clone(),
            length_km: input.attributes.length_km,
            categories: predictions,
            total,
            cost_per_km: per_km(total, input.attributes.length_km),
        })
    }

    fn predict_modeled(
        &self,
        category: &str,
        input: &SegmentInput,
        resolved: &BTreeMap<String, Option<f64>>,
    ) -> CategoryPrediction {
        let Some(artifact) = self.artifact.model(category) else {
            return absent(category, PredictionStatus::NotTrained);
        };

        let (model, r2, gate) = match artifact {
            CategoryArtifact::Segmented(bundle) => match bundle.get(&input.scope_type) {
                Some(scoped) => (&scoped.model, bundle.metrics_for(&input.scope_type).map(|m| m.r2), None),
                None => return absent(category, PredictionStatus::NoModelForScope),
            },
            CategoryArtifact::Single(single) => (&single.model, Some(single.metrics.r2), single.gate),
        };

        if let Some(gate) = gate {
            if input.attributes.get(gate) <= 0.0 {
                return absent(category, PredictionStatus::NotApplicable);
            }
        }

        let row = match predictor_row(artifact.predictors(), input, resolved) {
            Ok(row) => row,
            Err(CostError::MissingUpstreamPrediction { missing }) => {
                return absent(category, PredictionStatus::MissingUpstream { missing })
            }
            Err(err) => return absent(category, PredictionStatus::Failed { reason: err.to_string() }),
        };

        match model.predict_one(&row) {
            Ok(value) => CategoryPrediction {
                category: category.to_string(),
                value: Some(value),
                status: PredictionStatus::Predicted,
                r2,
            },
            Err(err) => {
                warn!(category, error = %err, "prediction failed");
                absent(category, PredictionStatus::Failed { reason: err.to_string() })
            }
        }
    }

    /// Predict every segment of a project and aggregate the totals.
    pub fn estimate_project(&self, segments: &[SegmentInput]) -> Result<ProjectEstimate> {
        if segments.is_empty() {
            return Err(CostError::InvalidInput("a project needs at least one segment".to_string()));
        }

        let predictions: Vec<SegmentPrediction> = segments
            .iter()
            .map(|s| self.predict(s))
            .collect::<Result<_>>()?;

        let mut category_totals: BTreeMap<String, f64> = BTreeMap::new();
        let mut r2s = Vec::new();
        for segment in &predictions {
            for category in &segment.categories {
                *category_totals.entry(category.category.clone()).or_insert(0.0) += category.value.unwrap_or(0.0);
                if let (Some(_), Some(r2)) = (category.value, category.r2) {
                    r2s.push(r2);
                }
            }
        }

        let total: f64 = predictions.iter().map(|s| s.total).sum();
        let total_length_km: f64 = predictions.iter().map(|s| s.length_km).sum();
        let confidence = (!r2s.is_empty()).then(|| r2s.iter().sum::<f64>() / r2s.len() as f64);

        Ok(ProjectEstimate {
            phase: self.phase(),
            segments: predictions,
            category_totals,
            total,
            total_length_km,
            cost_per_km: per_km(total, total_length_km),
            confidence,
        })
    }
}

/// Raw feature values for a model, reading chained inputs from the
/// predictions resolved so far.
fn predictor_row(
    sources: &[FeatureSource],
    input: &SegmentInput,
    resolved: &BTreeMap<String, Option<f64>>,
) -> Result<Vec<f64>> {
    let mut row = Vec::with_capacity(sources.len());
    let mut missing = Vec::new();
    for source in sources {
        match source {
            FeatureSource::Attribute(attribute) => row.push(input.attributes.get(*attribute)),
            FeatureSource::Category(name) => match resolved.get(&canonical_name(name)).copied().flatten() {
                Some(value) => row.push(value),
                None => missing.push(name.clone()),
            },
        }
    }
    if missing.is_empty() {
        Ok(row)
    } else {
        Err(CostError::MissingUpstreamPrediction { missing })
    }
}

fn absent(category: &str, status: PredictionStatus) -> CategoryPrediction {
    CategoryPrediction {
        category: category.to_string(),
        value: None,
        status,
        r2: None,
    }
}
