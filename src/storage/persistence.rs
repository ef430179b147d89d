// ============================================================================
// Persistence Adapter
// ============================================================================
//
// The pipeline hands finalized trees to a PersistAdapter; the on-disk layout
// is this module's concern alone. One durable record exists per
// (module, datastore kind), carrying the tree plus a monotonic commit
// sequence number used to detect torn writes on restart.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::core::{ConfError, Result};
use crate::storage::datastore::DatastoreKind;
use crate::storage::tree::Tree;

/// One durable record per (module, datastore kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub module: String,
    pub kind: DatastoreKind,
    pub commit_seq: u64,
    pub written_at: DateTime<Utc>,
    pub tree: Tree,
}

/// Durable storage for committed trees.
#[async_trait]
pub trait PersistAdapter: Send + Sync {
    async fn load(&self, module: &str, kind: DatastoreKind) -> Result<Option<PersistedRecord>>;

    /// Store must be atomic per record: a crashed write leaves either the
    /// previous record or the new one, never a torn mix.
    async fn store(&self, module: &str, kind: DatastoreKind, tree: &Tree, seq: u64) -> Result<()>;
}

/// Adapter that persists nothing. Suitable for candidate-only workloads and
/// tests that do not exercise durability.
pub struct NullPersist;

#[async_trait]
impl PersistAdapter for NullPersist {
    async fn load(&self, _module: &str, _kind: DatastoreKind) -> Result<Option<PersistedRecord>> {
        Ok(None)
    }

    async fn store(&self, _module: &str, _kind: DatastoreKind, _tree: &Tree, _seq: u64) -> Result<()> {
        Ok(())
    }
}

/// In-memory adapter. Records every store; can be armed to fail the next
/// store, which is how the post-apply persistence failure path is exercised.
pub struct MemoryPersist {
    records: RwLock<HashMap<(String, DatastoreKind), PersistedRecord>>,
    fail_next_store: AtomicBool,
}

impl MemoryPersist {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            fail_next_store: AtomicBool::new(false),
        }
    }

    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryPersist {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistAdapter for MemoryPersist {
    async fn load(&self, module: &str, kind: DatastoreKind) -> Result<Option<PersistedRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(module.to_string(), kind))
            .cloned())
    }

    async fn store(&self, module: &str, kind: DatastoreKind, tree: &Tree, seq: u64) -> Result<()> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(ConfError::Persistence(format!(
                "simulated store failure for module '{}' ({})",
                module, kind
            )));
        }
        self.records.write().await.insert(
            (module.to_string(), kind),
            PersistedRecord {
                module: module.to_string(),
                kind,
                commit_seq: seq,
                written_at: Utc::now(),
                tree: tree.compacted(),
            },
        );
        Ok(())
    }
}

/// File-backed adapter: one MessagePack file per (module, kind), written via
/// a temp file and an atomic rename.
pub struct FilePersist {
    dir: PathBuf,
}

impl FilePersist {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, module: &str, kind: DatastoreKind) -> PathBuf {
        self.dir.join(format!("{}.{}.mp", module, kind))
    }
}

#[async_trait]
impl PersistAdapter for FilePersist {
    async fn load(&self, module: &str, kind: DatastoreKind) -> Result<Option<PersistedRecord>> {
        let path = self.record_path(module, kind);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfError::Persistence(format!(
                    "cannot read '{}': {}",
                    path.display(),
                    e
                )))
            }
        };
        let record: PersistedRecord = rmp_serde::from_slice(&bytes).map_err(|e| {
            ConfError::Persistence(format!("corrupt record '{}': {}", path.display(), e))
        })?;
        if record.module != module || record.kind != kind {
            return Err(ConfError::Persistence(format!(
                "record '{}' belongs to module '{}' ({})",
                path.display(),
                record.module,
                record.kind
            )));
        }
        Ok(Some(record))
    }

    async fn store(&self, module: &str, kind: DatastoreKind, tree: &Tree, seq: u64) -> Result<()> {
        let record = PersistedRecord {
            module: module.to_string(),
            kind,
            commit_seq: seq,
            written_at: Utc::now(),
            tree: tree.compacted(),
        };
        let bytes = rmp_serde::to_vec(&record)
            .map_err(|e| ConfError::Persistence(format!("encode failed: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| ConfError::Persistence(format!("temp file: {}", e)))?;
        tmp.write_all(&bytes)
            .map_err(|e| ConfError::Persistence(format!("write failed: {}", e)))?;
        tmp.persist(self.record_path(module, kind))
            .map_err(|e| ConfError::Persistence(format!("rename failed: {}", e)))?;
        Ok(())
    }
}
