// ============================================================================
// Tree Merge
// ============================================================================
//
// Merges an externally supplied tree (e.g. an imported configuration) into a
// working tree. Conflict policy: incoming wins on leaf value collisions,
// list entries union keyed by their key values. Entries present only in the
// target survive untouched, so merging two interface lists keeps both sets.
//
// ============================================================================

use crate::core::Result;
use crate::storage::node::{Node, NodeId, NodeKind};
use crate::storage::tree::Tree;

/// Conflict resolution policy for `merge_into`.
///
/// Only one policy is currently defined; the parameter keeps the call sites
/// explicit about what happens on collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Last writer wins on scalar leaves, union on list entries.
    #[default]
    IncomingWins,
}

/// Merge `incoming` into `target` under the given policy.
pub fn merge_into(target: &mut Tree, incoming: &Tree, policy: MergePolicy) -> Result<()> {
    let MergePolicy::IncomingWins = policy;
    merge_children(target, target.root(), incoming, incoming.root());
    Ok(())
}

fn merge_children(target: &mut Tree, target_parent: NodeId, incoming: &Tree, incoming_parent: NodeId) {
    for &inc_child in &incoming.node(incoming_parent).children.clone() {
        let inc_node = incoming.node(inc_child).clone();
        match &inc_node.kind {
            NodeKind::Leaf(_) | NodeKind::Container => {
                match find_named(target, target_parent, &inc_node.name) {
                    Some(existing) if target.node(existing).kind.kind_name() == inc_node.kind.kind_name() => {
                        if inc_node.kind.is_leaf() {
                            // incoming wins on value collisions
                            target.node_at_mut(existing).kind = inc_node.kind.clone();
                        } else {
                            merge_children(target, existing, incoming, inc_child);
                        }
                    }
                    Some(existing) => {
                        // kind conflict: incoming replaces the target subtree
                        detach_child(target, target_parent, existing);
                        copy_subtree(target, target_parent, incoming, inc_child);
                    }
                    None => {
                        copy_subtree(target, target_parent, incoming, inc_child);
                    }
                }
            }
            NodeKind::List => {
                let target_list = match find_named(target, target_parent, &inc_node.name) {
                    Some(existing) if target.node(existing).kind.is_list() => existing,
                    Some(existing) => {
                        detach_child(target, target_parent, existing);
                        let list = target.alloc_node(Node::new(inc_node.name.clone(), NodeKind::List));
                        target.node_at_mut(target_parent).children.push(list);
                        list
                    }
                    None => {
                        let list = target.alloc_node(Node::new(inc_node.name.clone(), NodeKind::List));
                        target.node_at_mut(target_parent).children.push(list);
                        list
                    }
                };
                merge_list(target, target_list, incoming, inc_child);
            }
            NodeKind::ListEntry(_) => {
                // entries are handled by merge_list from their list parent
            }
        }
    }
}

fn merge_list(target: &mut Tree, target_list: NodeId, incoming: &Tree, incoming_list: NodeId) {
    for &inc_entry in &incoming.node(incoming_list).children.clone() {
        let Some(keys) = incoming.node(inc_entry).entry_keys().cloned() else {
            continue;
        };
        let existing = target
            .node(target_list)
            .children
            .iter()
            .copied()
            .find(|&c| target.node(c).entry_keys() == Some(&keys));
        match existing {
            Some(entry) => merge_children(target, entry, incoming, inc_entry),
            None => copy_subtree(target, target_list, incoming, inc_entry),
        }
    }
}

fn find_named(tree: &Tree, parent: NodeId, name: &str) -> Option<NodeId> {
    tree.node(parent)
        .children
        .iter()
        .copied()
        .find(|&c| tree.node(c).name == name)
}

fn detach_child(tree: &mut Tree, parent: NodeId, child: NodeId) {
    tree.node_at_mut(parent).children.retain(|&c| c != child);
}

fn copy_subtree(target: &mut Tree, target_parent: NodeId, source: &Tree, source_id: NodeId) {
    let node = source.node(source_id);
    let new_id = target.alloc_node(Node::new(node.name.clone(), node.kind.clone()));
    target.node_at_mut(target_parent).children.push(new_id);
    for &child in &node.children {
        copy_subtree(target, new_id, source, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Path, Value};

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn test_merge_disjoint_leaves_is_union() {
        let mut target = Tree::new("m");
        target.set_leaf(&p("/m:a"), Value::Int(1)).unwrap();
        let mut incoming = Tree::new("m");
        incoming.set_leaf(&p("/m:b"), Value::Int(2)).unwrap();

        merge_into(&mut target, &incoming, MergePolicy::IncomingWins).unwrap();
        assert_eq!(target.get_value(&p("/m:a")), Some(&Value::Int(1)));
        assert_eq!(target.get_value(&p("/m:b")), Some(&Value::Int(2)));
    }

    #[test]
    fn test_merge_leaf_collision_incoming_wins() {
        let mut target = Tree::new("m");
        target.set_leaf(&p("/m:x"), Value::Int(1)).unwrap();
        let mut incoming = Tree::new("m");
        incoming.set_leaf(&p("/m:x"), Value::Int(9)).unwrap();

        merge_into(&mut target, &incoming, MergePolicy::IncomingWins).unwrap();
        assert_eq!(target.get_value(&p("/m:x")), Some(&Value::Int(9)));
    }

    #[test]
    fn test_merge_list_entries_union_by_key() {
        let mut target = Tree::new("m");
        target.create_list_entry(&p("/m:ifaces/iface[name='eth0']")).unwrap();
        target
            .set_leaf(&p("/m:ifaces/iface[name='eth0']/descr"), "old".into())
            .unwrap();
        target.create_list_entry(&p("/m:ifaces/iface[name='eth1']")).unwrap();

        let mut incoming = Tree::new("m");
        incoming.create_list_entry(&p("/m:ifaces/iface[name='eth0']")).unwrap();
        incoming
            .set_leaf(&p("/m:ifaces/iface[name='eth0']/descr"), "updated".into())
            .unwrap();
        incoming.create_list_entry(&p("/m:ifaces/iface[name='vdsl0']")).unwrap();

        merge_into(&mut target, &incoming, MergePolicy::IncomingWins).unwrap();

        // shared key: incoming leaf wins
        assert_eq!(
            target.get_value(&p("/m:ifaces/iface[name='eth0']/descr")),
            Some(&Value::String("updated".into()))
        );
        // target-only and incoming-only entries both survive
        assert!(target.exists(&p("/m:ifaces/iface[name='eth1']")));
        assert!(target.exists(&p("/m:ifaces/iface[name='vdsl0']")));
    }

    #[test]
    fn test_merge_kind_conflict_replaces_subtree() {
        let mut target = Tree::new("m");
        target.set_leaf(&p("/m:thing/inner"), Value::Int(1)).unwrap();
        let mut incoming = Tree::new("m");
        incoming.set_leaf(&p("/m:thing"), Value::Int(5)).unwrap();

        merge_into(&mut target, &incoming, MergePolicy::IncomingWins).unwrap();
        assert_eq!(target.get_value(&p("/m:thing")), Some(&Value::Int(5)));
        assert!(!target.exists(&p("/m:thing/inner")));
    }
}
