// ============================================================================
// Datastores
// ============================================================================
//
// Each datastore kind (startup, running, candidate) holds one committed tree
// per module behind an Arc. Readers clone the Arc under a short read lock
// and never observe a commit in progress: publication replaces the Arcs in
// a single write-locked swap. The per-kind commit mutex serializes the
// Validating..Persisting span of the pipeline.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::storage::tree::Tree;

/// The three datastore kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatastoreKind {
    Startup,
    Running,
    Candidate,
}

impl DatastoreKind {
    pub fn all() -> [DatastoreKind; 3] {
        [
            DatastoreKind::Startup,
            DatastoreKind::Running,
            DatastoreKind::Candidate,
        ]
    }

    /// Only commits against the running datastore require live subscribers.
    pub fn requires_subscribers(&self) -> bool {
        matches!(self, DatastoreKind::Running)
    }
}

impl fmt::Display for DatastoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatastoreKind::Startup => write!(f, "startup"),
            DatastoreKind::Running => write!(f, "running"),
            DatastoreKind::Candidate => write!(f, "candidate"),
        }
    }
}

/// Committed configuration state for one datastore kind.
pub struct Datastore {
    kind: DatastoreKind,
    trees: RwLock<HashMap<String, Arc<Tree>>>,
    commit_lock: Mutex<()>,
    commit_seq: AtomicU64,
}

impl Datastore {
    pub fn new(kind: DatastoreKind) -> Self {
        Self {
            kind,
            trees: RwLock::new(HashMap::new()),
            commit_lock: Mutex::new(()),
            commit_seq: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> DatastoreKind {
        self.kind
    }

    /// Committed tree for `module`, if this datastore holds one.
    pub async fn tree(&self, module: &str) -> Option<Arc<Tree>> {
        self.trees.read().await.get(module).cloned()
    }

    /// Committed tree for `module`, or a fresh empty one.
    pub async fn tree_or_empty(&self, module: &str) -> Arc<Tree> {
        match self.tree(module).await {
            Some(tree) => tree,
            None => Arc::new(Tree::new(module)),
        }
    }

    /// Install a tree outside the commit pipeline (process bootstrap from
    /// persisted state).
    pub async fn install(&self, module: &str, tree: Tree, seq: u64) {
        let mut trees = self.trees.write().await;
        trees.insert(module.to_string(), Arc::new(tree));
        self.commit_seq.fetch_max(seq, Ordering::SeqCst);
    }

    /// Serialize commits against this datastore kind. The guard must be held
    /// for the whole Validating..Persisting span.
    pub async fn lock_commit(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    /// Sequence number the next successful commit will carry.
    pub fn next_commit_seq(&self) -> u64 {
        self.commit_seq.load(Ordering::SeqCst) + 1
    }

    pub fn commit_seq(&self) -> u64 {
        self.commit_seq.load(Ordering::SeqCst)
    }

    /// Atomically replace the committed trees for the given modules.
    /// Untouched modules keep their current snapshots.
    pub async fn publish(&self, new_trees: HashMap<String, Arc<Tree>>, seq: u64) {
        let mut trees = self.trees.write().await;
        for (module, tree) in new_trees {
            trees.insert(module, tree);
        }
        self.commit_seq.store(seq, Ordering::SeqCst);
    }

    pub async fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.trees.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// The process-wide set of datastores.
pub struct DatastoreSet {
    startup: Datastore,
    running: Datastore,
    candidate: Datastore,
}

impl DatastoreSet {
    pub fn new() -> Self {
        Self {
            startup: Datastore::new(DatastoreKind::Startup),
            running: Datastore::new(DatastoreKind::Running),
            candidate: Datastore::new(DatastoreKind::Candidate),
        }
    }

    pub fn get(&self, kind: DatastoreKind) -> &Datastore {
        match kind {
            DatastoreKind::Startup => &self.startup,
            DatastoreKind::Running => &self.running,
            DatastoreKind::Candidate => &self.candidate,
        }
    }

    /// Snapshot of a module's tree as seen from `kind`. The candidate
    /// datastore is derived copy-on-write from running: until a candidate
    /// commit touches a module, reads fall through to the running tree.
    pub async fn snapshot(&self, kind: DatastoreKind, module: &str) -> Arc<Tree> {
        match kind {
            DatastoreKind::Candidate => match self.candidate.tree(module).await {
                Some(tree) => tree,
                None => self.running.tree_or_empty(module).await,
            },
            _ => self.get(kind).tree_or_empty(module).await,
        }
    }
}

impl Default for DatastoreSet {
    fn default() -> Self {
        Self::new()
    }
}
