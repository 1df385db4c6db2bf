//! Training pipeline for per-phase road cost models.
//!
//! Turns persisted project records into a segment-level training table,
//! trains every category of a phase catalog and hands the resulting
//! artifact to a store.

pub mod dataset;
pub mod errors;
pub mod segmented;
pub mod specialized;
pub mod synthetic;
pub mod trainer;

use vialcost_core::{CostConfig, IncrementTable, Phase, PhaseModelArtifact};
use vialcost_store::{ArtifactStore, ModelArtifactStore};

pub use dataset::{load_increments, load_source_rows, DatasetAssembler, SourceRow, TrainingRow, TrainingTable};
pub use errors::TrainerError;
pub use segmented::{best_by_composite, ScopeSegmentedTrainer};
pub use specialized::{ProjectGrouping, SpecializedTrainer};
pub use trainer::PhaseTrainer;

/// Assemble, train and return the artifact of one phase.
pub fn train_phase(
    phase: Phase,
    records: &[SourceRow],
    increments: IncrementTable,
    config: &CostConfig,
) -> Result<PhaseModelArtifact, TrainerError> {
    let assembler = DatasetAssembler::new(phase.catalog(), increments, config.training.present_year);
    let table = assembler
        .assemble(records)
        .map_err(|err| TrainerError::Dataset(format!("{:#}", err)))?;
    PhaseTrainer::new(config.clone()).train(phase, &table)
}

/// Train a phase and persist it, returning the artifact and its locator.
pub fn train_and_store<S: ArtifactStore>(
    store: &ModelArtifactStore<S>,
    phase: Phase,
    records: &[SourceRow],
    increments: IncrementTable,
    config: &CostConfig,
) -> Result<(PhaseModelArtifact, String), TrainerError> {
    let artifact = train_phase(phase, records, increments, config)?;
    let locator = store.save(&artifact)?;
    Ok((artifact, locator))
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
