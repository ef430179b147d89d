pub mod datastore;
pub mod diff;
pub mod merge;
pub mod node;
pub mod persistence;
pub mod tree;

pub use datastore::{Datastore, DatastoreKind, DatastoreSet};
pub use diff::{diff, ChangeEntry, ChangeKind, ChangeSet};
pub use merge::{merge_into, MergePolicy};
pub use node::{Node, NodeId, NodeKind};
pub use persistence::{FilePersist, MemoryPersist, NullPersist, PersistAdapter, PersistedRecord};
pub use tree::{MovePosition, SetOutcome, Tree};
