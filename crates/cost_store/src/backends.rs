//! Byte-level storage backends.

use crate::{ArtifactStore, Result};
use parking_lot::RwLock;
use sled::Db;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// One file per key under a root directory.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the destination, so a reader sees either the old blob or the new one.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.path_for(key);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(key, bytes = bytes.len(), path = %path.display(), "artifact written");
        Ok(path.display().to_string())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }
}

/// Artifacts as values of a sled tree.
pub struct SledArtifactStore {
    db: Db,
    artifacts: sled::Tree,
}

impl SledArtifactStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let artifacts = db.open_tree("artifacts")?;
        Ok(Self { db, artifacts })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl ArtifactStore for SledArtifactStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.artifacts.insert(key.as_bytes(), bytes)?;
        self.flush()?;
        Ok(format!("sled://artifacts/{}", key))
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.artifacts.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.artifacts.contains_key(key.as_bytes())?)
    }
}

/// In-process store for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifactStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", key))
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn ArtifactStore) {
        assert!(!store.exists("a.json").unwrap());
        assert_eq!(store.load("a.json").unwrap(), None);
        store.save("a.json", b"first").unwrap();
        store.save("a.json", b"second").unwrap();
        assert!(store.exists("a.json").unwrap());
        assert_eq!(store.load("a.json").unwrap().as_deref(), Some(&b"second"[..]));
    }

    #[test]
    fn memory_store_replaces_blobs() {
        let store = MemoryArtifactStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn fs_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("models")).unwrap();
        exercise(&store);
        let entries: Vec<_> = fs::read_dir(store.root()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn sled_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledArtifactStore::new(dir.path().join("db")).unwrap();
        exercise(&store);
    }
}
