//! Configuration for training and inference runs

use crate::errors::{CostError, Result};
use crate::outliers::{OutlierMethod, VotingStrategy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CostConfig {
    /// Model training parameters
    pub training: TrainingConfig,
    /// Outlier filter parameters
    pub outliers: OutlierConfig,
    /// Artifact storage
    pub storage: StorageConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum rows a partition needs after cleaning
    pub min_samples: usize,
    /// Partitions with more rows than this are outlier-filtered before search
    pub outlier_min_rows: usize,
    /// Year all monetary values are restated to
    pub present_year: i32,
    /// Weight of R² in the log-transform selection score
    pub composite_r2_weight: f64,
    /// Weight of MAPE/100 in the log-transform selection score
    pub composite_mape_weight: f64,
    /// Synthetic rows generated for sparse categories
    pub synthetic_samples: usize,
    /// Seed shared by every randomized step
    pub seed: u64,
}

/// Outlier filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutlierConfig {
    /// Vote combination rule
    pub strategy: VotingStrategy,
    /// Active detectors
    pub methods: Vec<OutlierMethod>,
    /// Expected outlier fraction for percentile-based detectors
    pub contamination: f64,
    /// Fraction of detectors that must agree under majority voting
    pub voting_threshold: f64,
    /// Trees in the isolation forest
    pub isolation_trees: usize,
    /// Upper bound on neighbours for local density scoring
    pub max_neighbors: usize,
    /// Modified z-score threshold
    pub mad_threshold: f64,
    /// Plain z-score threshold
    pub z_threshold: f64,
    /// Tables with fewer rows than this are returned untouched
    pub min_rows: usize,
    /// Seed for the isolation forest
    pub seed: u64,
}

/// Artifact storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    Sled,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            outlier_min_rows: 10,
            present_year: 2025,
            composite_r2_weight: 0.35,
            composite_mape_weight: 0.65,
            synthetic_samples: 200,
            seed: 42,
        }
    }
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            strategy: VotingStrategy::Majority,
            methods: OutlierMethod::ALL.to_vec(),
            contamination: 0.10,
            voting_threshold: 0.5,
            isolation_trees: 200,
            max_neighbors: 20,
            mad_threshold: 3.5,
            z_threshold: 3.0,
            min_rows: 10,
            seed: 42,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("data/models"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CostConfig {
    /// Load configuration from a TOML file; missing keys fall back to defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let config: CostConfig = toml::from_str(&content)
            .map_err(|e| CostError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Write configuration as TOML.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CostError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `VIALCOST_*` environment overrides on top of the current values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("VIALCOST_MIN_SAMPLES") {
            match val.parse() {
                Ok(parsed) => self.training.min_samples = parsed,
                Err(_) => warn!("Ignoring invalid VIALCOST_MIN_SAMPLES={}", val),
            }
        }
        if let Some(val) = lookup("VIALCOST_PRESENT_YEAR") {
            match val.parse() {
                Ok(parsed) => self.training.present_year = parsed,
                Err(_) => warn!("Ignoring invalid VIALCOST_PRESENT_YEAR={}", val),
            }
        }
        if let Some(val) = lookup("VIALCOST_CONTAMINATION") {
            match val.parse() {
                Ok(parsed) => self.outliers.contamination = parsed,
                Err(_) => warn!("Ignoring invalid VIALCOST_CONTAMINATION={}", val),
            }
        }
        if let Some(val) = lookup("VIALCOST_STORAGE_BACKEND") {
            match val.to_ascii_lowercase().as_str() {
                "fs" => self.storage.backend = StorageBackend::Fs,
                "sled" => self.storage.backend = StorageBackend::Sled,
                other => warn!("Ignoring unknown VIALCOST_STORAGE_BACKEND={}", other),
            }
        }
        if let Some(val) = lookup("VIALCOST_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(val);
        }
        if let Some(val) = lookup("VIALCOST_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Human-readable warnings about suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let t = &self.training;
        let o = &self.outliers;

        if t.min_samples < 2 {
            warnings.push("min_samples below 2 cannot be cross-validated".to_string());
        }
        if (t.composite_r2_weight + t.composite_mape_weight - 1.0).abs() > 1e-9 {
            warnings.push(format!(
                "Composite weights sum to {}, expected 1",
                t.composite_r2_weight + t.composite_mape_weight
            ));
        }
        if !(o.contamination > 0.0 && o.contamination <= 0.5) {
            warnings.push("Contamination should be in (0, 0.5]".to_string());
        }
        if !(o.voting_threshold > 0.0 && o.voting_threshold <= 1.0) {
            warnings.push("Voting threshold should be in (0, 1]".to_string());
        }
        if o.methods.is_empty() {
            warnings.push("No outlier detectors enabled; filtering only drops zero targets".to_string());
        }
        if t.synthetic_samples == 0 {
            warnings.push("Synthetic augmentation disabled (0 samples)".to_string());
        }
        warnings
    }
}
