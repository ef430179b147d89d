// ============================================================================
// Arena Node Model
// ============================================================================
//
// Configuration trees are arenas of nodes addressed by index. A session's
// working tree owns its whole arena, so edits never alias a committed tree;
// committed trees are shared behind Arc and replaced by pointer swap, never
// mutated in place.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::Value;

/// Index of a node inside its owning tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

/// Structural kind of a data node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Interior node with named children.
    Container,
    /// Terminal node holding a typed value.
    Leaf(Value),
    /// User-ordered list; children are `ListEntry` nodes.
    List,
    /// One list entry, identified by its key values in canonical form.
    ListEntry(BTreeMap<String, String>),
}

impl NodeKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeKind::Leaf(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, NodeKind::List)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Container => "container",
            NodeKind::Leaf(_) => "leaf",
            NodeKind::List => "list",
            NodeKind::ListEntry(_) => "list entry",
        }
    }
}

/// A single node in the arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Child order is meaningful for list entries (user-ordered lists).
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Leaf(v) => Some(v),
            _ => None,
        }
    }

    pub fn entry_keys(&self) -> Option<&BTreeMap<String, String>> {
        match &self.kind {
            NodeKind::ListEntry(keys) => Some(keys),
            _ => None,
        }
    }
}
