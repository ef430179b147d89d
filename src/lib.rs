// ============================================================================
// ConfDB Library
// ============================================================================
//
// Schema-governed configuration datastore: modules hold typed data trees,
// sessions edit private working copies, and a multi-phase commit pipeline
// (validate, verify, apply, persist) publishes changes atomically while
// subscribers get their say before anything takes effect.
//
// ============================================================================

pub mod access;
pub mod commit;
pub mod core;
pub mod facade;
pub mod schema;
pub mod session;
pub mod storage;
pub mod subscription;

// Re-export main types for convenience
pub use facade::{ConfDb, ConfDbBuilder};
pub use crate::core::{ConfError, Path, Result, Segment, Value};

pub use access::{AccessControl, AccessOp, AclRule, AllowAll, Credential, SubtreeAcl};
pub use commit::{CommitOptions, CommitReport, CommitStage};
pub use schema::{
    DependencyGraph, DependencyKind, FeatureGate, FeatureGatedValidator, Module, ModuleRegistry,
    PermissiveValidator, SchemaValidator, Violation,
};
pub use session::{ChangeOp, Session, SessionId, SessionInfo, SessionManager};
pub use storage::{
    ChangeEntry, ChangeKind, ChangeSet, DatastoreKind, FilePersist, MemoryPersist, MergePolicy,
    MovePosition, NullPersist, PersistAdapter, PersistedRecord, Tree,
};
pub use subscription::{Notifier, NotifyOutcome, Phase, SubscriptionId, SubscriptionRegistry};
