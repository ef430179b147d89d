// ============================================================================
// Structural Diff
// ============================================================================
//
// Computes the per-module change set between two trees: the committed
// datastore tree and a session's working tree. The result is deterministic
// (ordered by canonical path) so validation, notification and logging see
// the same sequence for the same pair of trees.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{Path, Value};
use crate::storage::node::NodeKind;
use crate::storage::tree::Tree;

/// What happened to a node between the old and the new tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    /// A user-ordered list entry changed position among surviving siblings.
    Moved,
}

/// One (path, operation, old, new) tuple of a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub path: Path,
    pub kind: ChangeKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Ordered set of changes for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub module: String,
    pub entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    pub fn empty(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First affected path, used in commit error reports.
    pub fn first_path(&self) -> Option<&Path> {
        self.entries.first().map(|e| &e.path)
    }

    /// True when any entry touches `path` or a node inside its subtree.
    pub fn touches(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.path.starts_with(path))
    }
}

/// Diff `old` against `new`, producing the change set that turns `old` into
/// `new`.
pub fn diff(old: &Tree, new: &Tree) -> ChangeSet {
    debug_assert_eq!(old.module(), new.module());
    let mut entries = Vec::new();

    let old_nodes: BTreeMap<String, (Path, crate::storage::node::NodeId)> = old
        .visit()
        .into_iter()
        .map(|(p, id)| (p.to_string(), (p, id)))
        .collect();
    let new_nodes: BTreeMap<String, (Path, crate::storage::node::NodeId)> = new
        .visit()
        .into_iter()
        .map(|(p, id)| (p.to_string(), (p, id)))
        .collect();

    for (key, (path, new_id)) in &new_nodes {
        match old_nodes.get(key) {
            None => entries.push(ChangeEntry {
                path: path.clone(),
                kind: ChangeKind::Created,
                old: None,
                new: new.node(*new_id).value().cloned(),
            }),
            Some((_, old_id)) => {
                let old_val = old.node(*old_id).value();
                let new_val = new.node(*new_id).value();
                if old_val != new_val {
                    entries.push(ChangeEntry {
                        path: path.clone(),
                        kind: ChangeKind::Modified,
                        old: old_val.cloned(),
                        new: new_val.cloned(),
                    });
                }
            }
        }
    }

    for (key, (path, old_id)) in &old_nodes {
        if !new_nodes.contains_key(key) {
            entries.push(ChangeEntry {
                path: path.clone(),
                kind: ChangeKind::Deleted,
                old: old.node(*old_id).value().cloned(),
                new: None,
            });
        }
    }

    entries.extend(moved_entries(old, new));

    entries.sort_by(|a, b| a.path.cmp(&b.path).then(op_rank(a.kind).cmp(&op_rank(b.kind))));
    ChangeSet {
        module: new.module().to_string(),
        entries,
    }
}

fn op_rank(kind: ChangeKind) -> u8 {
    match kind {
        ChangeKind::Created => 0,
        ChangeKind::Modified => 1,
        ChangeKind::Deleted => 2,
        ChangeKind::Moved => 3,
    }
}

/// Detect reordered list entries: for every list present in both trees,
/// entries surviving on both sides whose position among the survivors
/// differs are reported as Moved.
fn moved_entries(old: &Tree, new: &Tree) -> Vec<ChangeEntry> {
    let old_lists = collect_lists(old);
    let new_lists = collect_lists(new);
    let mut out = Vec::new();

    for (list_key, new_order) in &new_lists {
        let Some(old_order) = old_lists.get(list_key) else {
            continue;
        };
        let common_old: Vec<&(String, Path)> = old_order
            .iter()
            .filter(|(k, _)| new_order.iter().any(|(nk, _)| nk == k))
            .collect();
        let common_new: Vec<&(String, Path)> = new_order
            .iter()
            .filter(|(k, _)| old_order.iter().any(|(ok, _)| ok == k))
            .collect();

        for (i, (key, path)) in common_new.iter().enumerate() {
            if common_old.get(i).map(|(k, _)| k) != Some(key) {
                out.push(ChangeEntry {
                    path: path.clone(),
                    kind: ChangeKind::Moved,
                    old: None,
                    new: None,
                });
            }
        }
    }
    out
}

/// Map from list path to its ordered (entry key signature, entry path) pairs.
fn collect_lists(tree: &Tree) -> BTreeMap<String, Vec<(String, Path)>> {
    let mut lists: BTreeMap<String, Vec<(String, Path)>> = BTreeMap::new();
    for (path, id) in tree.visit() {
        if let NodeKind::ListEntry(keys) = &tree.node(id).kind {
            let list_key = match path.parent() {
                Some(parent) => format!("{}/{}", parent, path.last().name),
                None => format!("/{}:{}", tree.module(), path.last().name),
            };
            let signature = keys
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",");
            lists.entry(list_key).or_default().push((signature, path));
        }
    }
    lists
}
