//! Cost model core for road infrastructure design contracts.
//!
//! Historical consultancy costs are turned into per-category regression
//! models, one artifact per project phase. This crate holds the numerical
//! pieces (outlier filtering, regression families, cross-validated model
//! search), the phase catalogs describing how each category is modeled, and
//! the inference orchestrator that applies a trained artifact to new
//! segments. Persistence lives in `vialcost-store`, training orchestration
//! and the CLI in `vialcost-trainer`.

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod inference;
pub mod metrics;
pub mod outliers;
pub mod present_value;
pub mod regression;
pub mod search;
pub mod serialization;
pub mod transform;

pub use artifact::{
    ArtifactMetadata, CategoryArtifact, CategoryModelBundle, FittedModel, MetricsRow, PhaseModelArtifact,
    ScopedModel, SingleModel,
};
pub use catalog::{
    canonical_name, item_order, Attribute, CategoryRole, CategorySpec, CategoryStrategy, ChainedEstimator,
    FeatureSource, Phase, PhaseCatalog, SegmentAttributes,
};
pub use config::{CostConfig, LoggingConfig, OutlierConfig, StorageBackend, StorageConfig, TrainingConfig};
pub use errors::{CostError, Result};
pub use inference::{
    CategoryPrediction, InferenceOrchestrator, PredictionStatus, ProjectEstimate, SegmentInput, SegmentPrediction,
};
pub use metrics::RegressionMetrics;
pub use outliers::{OutlierFilter, OutlierMethod, VotingStrategy};
pub use present_value::IncrementTable;
pub use regression::{KernelGamma, ModelFamily, ModelSpec, Pipeline};
pub use search::{
    CandidateFamily, CandidateModelSearch, CrossValidation, EvaluationPlan, FoldRule, GridScoring, SearchResult,
};
pub use transform::{FeatureExpansion, LogTransform};

/// Version recorded in every trained artifact.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
