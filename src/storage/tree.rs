// ============================================================================
// Configuration Tree
// ============================================================================
//
// One Tree holds the configuration of a single module for one datastore.
// Node addressing follows core::Path; list entries are selected by key
// predicates. Every edit validates the full path before the first mutation,
// so a failed call leaves the tree untouched.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{ConfError, Path, Result, Segment, Value};
use crate::storage::node::{Node, NodeId, NodeKind};

/// Target position for moving an entry inside a user-ordered list.
#[derive(Debug, Clone, PartialEq)]
pub enum MovePosition {
    First,
    Last,
    /// Immediately before the sibling entry with these key values.
    Before(BTreeMap<String, String>),
    /// Immediately after the sibling entry with these key values.
    After(BTreeMap<String, String>),
}

/// Outcome of a `set_leaf` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Created,
    Modified,
    /// The leaf already held exactly this value.
    Unchanged,
}

/// Arena-backed configuration tree for one module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    module: String,
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    pub fn new(module: impl Into<String>) -> Self {
        let root = Node::new("", NodeKind::Container);
        Self {
            module: module.into(),
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    // crate-internal accessors for the merge machinery
    pub(crate) fn node_at_mut(&mut self, id: NodeId) -> &mut Node {
        self.node_mut(id)
    }

    pub(crate) fn alloc_node(&mut self, node: Node) -> NodeId {
        self.alloc(node)
    }

    /// True when the tree holds no configuration at all.
    pub fn is_empty(&self) -> bool {
        self.node(self.root).children.is_empty()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).name == name)
    }

    fn find_entry(&self, list: NodeId, keys: &BTreeMap<String, String>) -> Option<NodeId> {
        self.node(list)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).entry_keys() == Some(keys))
    }

    /// Resolve one segment starting from `parent`.
    fn resolve_segment(&self, parent: NodeId, seg: &Segment) -> Option<NodeId> {
        let named = self.find_child(parent, &seg.name)?;
        if seg.has_keys() {
            if !self.node(named).kind.is_list() {
                return None;
            }
            self.find_entry(named, &seg.keys)
        } else {
            Some(named)
        }
    }

    /// Resolve a full path to a node, if present.
    pub fn resolve(&self, path: &Path) -> Option<NodeId> {
        debug_assert_eq!(path.module(), self.module);
        let mut current = self.root;
        for seg in path.segments() {
            current = self.resolve_segment(current, seg)?;
        }
        Some(current)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.resolve(path).is_some()
    }

    /// Leaf value at `path`, if the node exists and is a leaf.
    pub fn get_value(&self, path: &Path) -> Option<&Value> {
        self.resolve(path).and_then(|id| self.node(id).value())
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Set a leaf value, creating missing interior nodes along the path.
    ///
    /// # Errors
    /// `SchemaViolation` when an existing node on the path has an
    /// incompatible kind (e.g. a leaf where a container is addressed), or
    /// when the target exists and is not a leaf. The tree is unchanged on
    /// error.
    pub fn set_leaf(&mut self, path: &Path, value: Value) -> Result<SetOutcome> {
        let last = path.last();
        if last.has_keys() {
            return Err(ConfError::SchemaViolation(format!(
                "'{}' addresses a list entry, not a leaf",
                path
            )));
        }

        // Validation pass: no mutation until the whole path checks out.
        self.check_interior(path)?;
        if let Some(existing) = self.resolve(path) {
            let node = self.node(existing);
            if !node.kind.is_leaf() {
                return Err(ConfError::SchemaViolation(format!(
                    "'{}' exists as a {}, not a leaf",
                    path,
                    node.kind.kind_name()
                )));
            }
            if self.is_entry_key(existing, path) {
                return Err(ConfError::SchemaViolation(format!(
                    "list key '{}' cannot be modified",
                    path
                )));
            }
        }

        let parent = self.ensure_interior(path)?;
        if let Some(existing) = self.find_child(parent, &last.name) {
            if self.node(existing).value() == Some(&value) {
                return Ok(SetOutcome::Unchanged);
            }
            self.node_mut(existing).kind = NodeKind::Leaf(value);
            Ok(SetOutcome::Modified)
        } else {
            let leaf = self.alloc(Node::new(last.name.clone(), NodeKind::Leaf(value)));
            self.node_mut(parent).children.push(leaf);
            Ok(SetOutcome::Created)
        }
    }

    /// Create a list entry addressed by a keyed final segment. The entry's
    /// key leaves are materialized inside it.
    ///
    /// # Errors
    /// `InvalidPath` when the final segment carries no keys;
    /// `SchemaViolation` when the entry already exists or the list name is
    /// taken by a non-list node.
    pub fn create_list_entry(&mut self, path: &Path) -> Result<()> {
        let last = path.last();
        if !last.has_keys() {
            return Err(ConfError::InvalidPath(format!(
                "'{}' does not select a list entry (missing key predicates)",
                path
            )));
        }

        self.check_interior(path)?;
        let parent = {
            // validate the list node kind before mutating
            let parent_probe = self.probe_interior(path);
            if let Some(p) = parent_probe {
                if let Some(list) = self.find_child(p, &last.name) {
                    if !self.node(list).kind.is_list() {
                        return Err(ConfError::SchemaViolation(format!(
                            "'{}' exists as a {}, not a list",
                            path,
                            self.node(list).kind.kind_name()
                        )));
                    }
                    if self.find_entry(list, &last.keys).is_some() {
                        return Err(ConfError::SchemaViolation(format!(
                            "list entry '{}' already exists",
                            path
                        )));
                    }
                }
            }
            self.ensure_interior(path)?
        };

        let list = match self.find_child(parent, &last.name) {
            Some(list) => list,
            None => {
                let list = self.alloc(Node::new(last.name.clone(), NodeKind::List));
                self.node_mut(parent).children.push(list);
                list
            }
        };

        let entry = self.alloc(Node::new(
            last.name.clone(),
            NodeKind::ListEntry(last.keys.clone()),
        ));
        for (key, val) in &last.keys {
            let leaf = self.alloc(Node::new(key.clone(), NodeKind::Leaf(Value::String(val.clone()))));
            self.node_mut(entry).children.push(leaf);
        }
        self.node_mut(list).children.push(entry);
        Ok(())
    }

    /// Delete the subtree rooted at `path`.
    ///
    /// # Errors
    /// `InvalidPath` when no such node exists; `SchemaViolation` when the
    /// target is a list key leaf.
    pub fn delete_subtree(&mut self, path: &Path) -> Result<Option<Value>> {
        let target = self
            .resolve(path)
            .ok_or_else(|| ConfError::InvalidPath(format!("no such node: '{}'", path)))?;
        if self.is_entry_key(target, path) {
            return Err(ConfError::SchemaViolation(format!(
                "list key '{}' cannot be deleted",
                path
            )));
        }

        let old = self.node(target).value().cloned();
        let parent = match path.parent() {
            Some(parent_path) => {
                let last = path.last();
                if last.has_keys() {
                    // the entry's parent is the list node
                    let list_path = parent_path.child(Segment::new(last.name.clone()));
                    self.resolve(&list_path)
                } else {
                    self.resolve(&parent_path)
                }
            }
            None => {
                let last = path.last();
                if last.has_keys() {
                    self.find_child(self.root, &last.name)
                } else {
                    Some(self.root)
                }
            }
        }
        .ok_or_else(|| ConfError::Execution(format!("orphaned node at '{}'", path)))?;

        self.node_mut(parent).children.retain(|&c| c != target);
        Ok(old)
    }

    /// Reorder a list entry inside its user-ordered list.
    ///
    /// # Errors
    /// `InvalidPath` when the entry or the Before/After reference sibling
    /// does not exist.
    pub fn move_list_entry(&mut self, path: &Path, position: &MovePosition) -> Result<()> {
        let last = path.last();
        if !last.has_keys() {
            return Err(ConfError::InvalidPath(format!(
                "'{}' does not select a list entry (missing key predicates)",
                path
            )));
        }
        let entry = self
            .resolve(path)
            .ok_or_else(|| ConfError::InvalidPath(format!("no such list entry: '{}'", path)))?;

        let list = {
            let list_path = match path.parent() {
                Some(parent) => parent.child(Segment::new(last.name.clone())),
                None => Path::parse(&format!("/{}:{}", self.module, last.name))?,
            };
            self.resolve(&list_path)
                .ok_or_else(|| ConfError::Execution(format!("orphaned entry at '{}'", path)))?
        };

        let anchor = match position {
            MovePosition::Before(keys) | MovePosition::After(keys) => {
                Some(self.find_entry(list, keys).ok_or_else(|| {
                    ConfError::InvalidPath(format!(
                        "move reference entry does not exist in list '{}'",
                        last.name
                    ))
                })?)
            }
            _ => None,
        };

        let children = &mut self.node_mut(list).children;
        children.retain(|&c| c != entry);
        let idx = match (position, anchor) {
            (MovePosition::First, _) => 0,
            (MovePosition::Before(_), Some(a)) => {
                children.iter().position(|&c| c == a).unwrap_or(children.len())
            }
            (MovePosition::After(_), Some(a)) => children
                .iter()
                .position(|&c| c == a)
                .map(|i| i + 1)
                .unwrap_or(children.len()),
            _ => children.len(),
        };
        children.insert(idx, entry);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interior path handling
    // ------------------------------------------------------------------

    /// Check that every existing interior node on the path has a kind
    /// compatible with how the path addresses it.
    fn check_interior(&self, path: &Path) -> Result<()> {
        let mut current = self.root;
        for seg in &path.segments()[..path.depth() - 1] {
            let Some(named) = self.find_child(current, &seg.name) else {
                return Ok(()); // everything below will be freshly created
            };
            let node = self.node(named);
            if seg.has_keys() {
                if !node.kind.is_list() {
                    return Err(ConfError::SchemaViolation(format!(
                        "'{}' in '{}' exists as a {}, not a list",
                        seg.name,
                        path,
                        node.kind.kind_name()
                    )));
                }
                match self.find_entry(named, &seg.keys) {
                    Some(entry) => current = entry,
                    None => return Ok(()),
                }
            } else {
                if !matches!(node.kind, NodeKind::Container) {
                    return Err(ConfError::SchemaViolation(format!(
                        "'{}' in '{}' exists as a {}, not a container",
                        seg.name,
                        path,
                        node.kind.kind_name()
                    )));
                }
                current = named;
            }
        }
        Ok(())
    }

    /// Resolve as far along the interior of the path as existing nodes go.
    fn probe_interior(&self, path: &Path) -> Option<NodeId> {
        let mut current = self.root;
        for seg in &path.segments()[..path.depth() - 1] {
            current = self.resolve_segment(current, seg)?;
        }
        Some(current)
    }

    /// Create any missing interior nodes and return the direct parent of the
    /// final segment. Callers must have run `check_interior` first.
    fn ensure_interior(&mut self, path: &Path) -> Result<NodeId> {
        let mut current = self.root;
        for seg in path.segments()[..path.depth() - 1].to_vec() {
            if let Some(next) = self.resolve_segment(current, &seg) {
                current = next;
                continue;
            }
            if seg.has_keys() {
                let list = match self.find_child(current, &seg.name) {
                    Some(list) => list,
                    None => {
                        let list = self.alloc(Node::new(seg.name.clone(), NodeKind::List));
                        self.node_mut(current).children.push(list);
                        list
                    }
                };
                let entry = self.alloc(Node::new(
                    seg.name.clone(),
                    NodeKind::ListEntry(seg.keys.clone()),
                ));
                for (key, val) in &seg.keys {
                    let leaf = self
                        .alloc(Node::new(key.clone(), NodeKind::Leaf(Value::String(val.clone()))));
                    self.node_mut(entry).children.push(leaf);
                }
                self.node_mut(list).children.push(entry);
                current = entry;
            } else {
                let container = self.alloc(Node::new(seg.name.clone(), NodeKind::Container));
                self.node_mut(current).children.push(container);
                current = container;
            }
        }
        Ok(current)
    }

    /// True when `id` is a key leaf of its enclosing list entry.
    fn is_entry_key(&self, id: NodeId, path: &Path) -> bool {
        if !self.node(id).kind.is_leaf() {
            return false;
        }
        let Some(parent_path) = path.parent() else {
            return false;
        };
        if !parent_path.last().has_keys() {
            return false;
        }
        parent_path.last().keys.contains_key(&path.last().name)
    }

    // ------------------------------------------------------------------
    // Traversal and comparison
    // ------------------------------------------------------------------

    /// Depth-first walk producing (path, node) pairs in deterministic order:
    /// container children by name, list entries in list order.
    pub fn visit(&self) -> Vec<(Path, NodeId)> {
        let mut out = Vec::new();
        let base: Option<Path> = None;
        self.visit_children(self.root, &base, &mut out);
        out
    }

    fn visit_children(&self, parent: NodeId, base: &Option<Path>, out: &mut Vec<(Path, NodeId)>) {
        let mut children: Vec<NodeId> = self.node(parent).children.clone();
        if !self.node(parent).kind.is_list() {
            children.sort_by(|&a, &b| self.node(a).name.cmp(&self.node(b).name));
        }
        for child in children {
            let node = self.node(child);
            let seg = match &node.kind {
                NodeKind::ListEntry(keys) => Segment::with_keys(
                    node.name.clone(),
                    keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                ),
                _ => Segment::new(node.name.clone()),
            };
            let path = match base {
                Some(p) => p.child(seg),
                None => {
                    // top-level segments need the module prefix
                    let rendered = format!("/{}:{}", self.module, seg);
                    match Path::parse(&rendered) {
                        Ok(p) => p,
                        Err(_) => continue,
                    }
                }
            };
            // the list node itself is transparent: entries carry the paths
            if !node.kind.is_list() {
                out.push((path.clone(), child));
            }
            self.visit_children(child, &Some(path), out);
        }
    }

    /// Structural equality from the roots, ignoring arena layout and any
    /// detached garbage slots.
    pub fn structural_eq(&self, other: &Tree) -> bool {
        self.module == other.module && self.nodes_eq(self.root, other, other.root)
    }

    fn nodes_eq(&self, a: NodeId, other: &Tree, b: NodeId) -> bool {
        let na = self.node(a);
        let nb = other.node(b);
        if na.name != nb.name || na.kind != nb.kind {
            return false;
        }
        if na.children.len() != nb.children.len() {
            return false;
        }
        if na.kind.is_list() {
            // entry order is meaningful
            na.children
                .iter()
                .zip(nb.children.iter())
                .all(|(&ca, &cb)| self.nodes_eq(ca, other, cb))
        } else {
            // name-keyed children, order irrelevant
            na.children.iter().all(|&ca| {
                let name = &self.node(ca).name;
                match nb.children.iter().find(|&&cb| &other.node(cb).name == name) {
                    Some(&cb) => self.nodes_eq(ca, other, cb),
                    None => false,
                }
            })
        }
    }

    /// JSON projection of the tree: containers become objects, lists become
    /// arrays of entry objects. Used by export tooling and diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        self.json_object(self.root)
    }

    fn json_object(&self, parent: NodeId) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for &child in &self.node(parent).children {
            let node = self.node(child);
            match &node.kind {
                NodeKind::Leaf(v) => {
                    obj.insert(node.name.clone(), v.into());
                }
                NodeKind::Container | NodeKind::ListEntry(_) => {
                    obj.insert(node.name.clone(), self.json_object(child));
                }
                NodeKind::List => {
                    let entries: Vec<serde_json::Value> =
                        node.children.iter().map(|&e| self.json_object(e)).collect();
                    obj.insert(node.name.clone(), serde_json::Value::Array(entries));
                }
            }
        }
        serde_json::Value::Object(obj)
    }

    /// Rebuild the arena keeping only reachable nodes. Used before a tree is
    /// persisted or published, so shared snapshots never carry edit garbage.
    pub fn compacted(&self) -> Tree {
        let mut out = Tree::new(self.module.clone());
        self.copy_into(self.root, out.root, &mut out);
        out
    }

    fn copy_into(&self, from: NodeId, to: NodeId, out: &mut Tree) {
        for &child in &self.node(from).children {
            let node = self.node(child);
            let new_id = out.alloc(Node::new(node.name.clone(), node.kind.clone()));
            out.node_mut(to).children.push(new_id);
            self.copy_into(child, new_id, out);
        }
    }
}
