//! Error types for the cost estimation core

use thiserror::Error;

/// Errors raised while training or applying cost models
#[derive(Error, Debug)]
pub enum CostError {
    /// Too few rows survived cleaning to fit a model
    #[error("Insufficient data: needed at least {needed} rows, found {found}")]
    InsufficientData { needed: usize, found: usize },

    /// A chained category could not run because an upstream value is missing
    #[error("Missing upstream prediction: {}", missing.join(", "))]
    MissingUpstreamPrediction { missing: Vec<String> },

    /// No trained artifact is available for a phase
    #[error("No trained model artifact for phase {0}; train the phase first")]
    ArtifactNotFound(String),

    /// Domain identifier does not map to a supported phase, scope or category
    #[error("Unsupported scope or phase: {0}")]
    UnsupportedScopeOrPhase(String),

    /// Every candidate family failed during model search
    #[error("All candidate models failed: {0}")]
    AllCandidatesFailed(String),

    /// Linear algebra or optimisation failure
    #[error("Numerical failure: {0}")]
    Numerical(String),

    /// Malformed caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CostError {
    /// Recoverable conditions translate to explicit absence instead of aborting a run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CostError::InsufficientData { .. } | CostError::MissingUpstreamPrediction { .. }
        )
    }
}

/// Result type for cost core operations
pub type Result<T> = std::result::Result<T, CostError>;
