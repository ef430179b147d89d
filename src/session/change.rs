// ============================================================================
// Session Change Log
// ============================================================================
//
// Each accepted edit appends one entry here. The log records intent in
// order; the authoritative per-module change sets are recomputed at commit
// time as structural diffs, so the log stays cheap and append-only.
//
// ============================================================================

use crate::core::{Path, Value};
use crate::storage::tree::MovePosition;

/// One node-level operation accepted by a session.
#[derive(Debug, Clone)]
pub enum ChangeOp {
    SetValue {
        path: Path,
        value: Value,
    },
    CreateListEntry {
        path: Path,
    },
    DeleteSubtree {
        path: Path,
        /// Leaf value removed, when the subtree root was a leaf.
        old: Option<Value>,
    },
    MoveListEntry {
        path: Path,
        position: MovePosition,
    },
}

impl ChangeOp {
    pub fn path(&self) -> &Path {
        match self {
            ChangeOp::SetValue { path, .. } => path,
            ChangeOp::CreateListEntry { path } => path,
            ChangeOp::DeleteSubtree { path, .. } => path,
            ChangeOp::MoveListEntry { path, .. } => path,
        }
    }

    pub fn module(&self) -> &str {
        self.path().module()
    }
}
