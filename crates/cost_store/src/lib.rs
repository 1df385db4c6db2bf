//! Persistence for trained phase artifacts.
//!
//! [`ArtifactStore`] is a byte-oriented key/value contract so the training
//! core does not care whether artifacts live on a local disk, in sled or in
//! memory. [`ModelArtifactStore`] layers the artifact encoding on top: a
//! canonical JSON envelope carrying a BLAKE3 digest of the artifact, checked
//! again on load.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vialcost_core::serialization::canonical_json_bytes;
use vialcost_core::{CostError, InferenceOrchestrator, Phase, PhaseModelArtifact};

mod backends;

pub use backends::{FsArtifactStore, MemoryArtifactStore, SledArtifactStore};

/// Envelope layout version written by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Core(#[from] CostError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Core(CostError::ArtifactNotFound(_)))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Byte-level artifact storage.
pub trait ArtifactStore {
    /// Replace the blob under `key` as a whole and return where it landed.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn exists(&self, key: &str) -> Result<bool>;
}

impl<S: ArtifactStore + ?Sized> ArtifactStore for Box<S> {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        (**self).save(key, bytes)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).load(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactEnvelope {
    format_version: u32,
    phase: Phase,
    hash: String,
    artifact: PhaseModelArtifact,
}

/// Typed view over an [`ArtifactStore`], one artifact per phase.
#[derive(Debug, Clone)]
pub struct ModelArtifactStore<S> {
    store: S,
}

impl<S: ArtifactStore> ModelArtifactStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Persist `artifact` under its phase key, replacing any earlier one.
    pub fn save(&self, artifact: &PhaseModelArtifact) -> Result<String> {
        let phase = artifact.metadata.phase;
        let envelope = ArtifactEnvelope {
            format_version: FORMAT_VERSION,
            phase,
            hash: artifact.content_hash()?,
            artifact: artifact.clone(),
        };
        let bytes = canonical_json_bytes(&envelope)?;
        let locator = self.store.save(&phase.storage_key(), &bytes)?;
        info!(
            phase = %phase,
            categories = artifact.models.len(),
            hash = %envelope.hash,
            locator = %locator,
            "phase artifact saved"
        );
        Ok(locator)
    }

    /// Load the artifact of `phase`.
    ///
    /// A blob that does not decode, carries another layout version, names a
    /// different phase or fails its digest check is logged and reported as
    /// absent so the caller retrains instead of serving a damaged model.
    pub fn load(&self, phase: Phase) -> Result<Option<PhaseModelArtifact>> {
        let key = phase.storage_key();
        let Some(bytes) = self.store.load(&key)? else {
            return Ok(None);
        };

        let envelope: ArtifactEnvelope = match serde_json::from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(phase = %phase, key = %key, error = %err, "artifact does not decode; ignoring it");
                return Ok(None);
            }
        };
        if envelope.format_version != FORMAT_VERSION {
            warn!(phase = %phase, found = envelope.format_version, expected = FORMAT_VERSION, "unsupported artifact version");
            return Ok(None);
        }
        if envelope.phase != phase || envelope.artifact.metadata.phase != phase {
            warn!(phase = %phase, stored = %envelope.phase, "artifact stored under the wrong phase key");
            return Ok(None);
        }
        let digest = envelope.artifact.content_hash()?;
        if digest != envelope.hash {
            warn!(phase = %phase, stored = %envelope.hash, computed = %digest, "artifact digest mismatch");
            return Ok(None);
        }
        Ok(Some(envelope.artifact))
    }

    pub fn load_required(&self, phase: Phase) -> Result<PhaseModelArtifact> {
        self.load(phase)?
            .ok_or_else(|| CostError::ArtifactNotFound(phase.to_string()).into())
    }

    /// Orchestrator for a phase given by code or display name.
    pub fn orchestrator(&self, phase_identifier: &str) -> Result<InferenceOrchestrator> {
        let phase = Phase::from_identifier(phase_identifier)?;
        Ok(InferenceOrchestrator::new(self.load_required(phase)?))
    }

    /// Phases that currently have a stored blob.
    pub fn available_phases(&self) -> Result<Vec<Phase>> {
        let mut phases = Vec::new();
        for phase in Phase::ALL {
            if self.store.exists(&phase.storage_key())? {
                phases.push(phase);
            }
        }
        Ok(phases)
    }
}
