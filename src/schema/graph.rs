// ============================================================================
// Module Dependency Graph
// ============================================================================
//
// Static, process-lifetime graph of inter-module references. Import and
// augment edges must form a DAG (checked once at load, fatal on failure) and
// drive the verify/apply dispatch order. Data-reference edges (leafref,
// instance-identifier targets) may be cyclic; they only widen the set of
// modules a commit must re-validate and notify.
//
// Worst case, the data-reference closure touches every loaded module, so
// commit cost is O(modules). The closure is recomputed per commit rather
// than cached; a cache could go stale against feature-dependent references.
//
// ============================================================================

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::core::{ConfError, Result};

/// Kind of an inter-module reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Import,
    Augment,
    Deviation,
    /// Leafref / instance-identifier target in another module's data.
    DataRef,
}

impl DependencyKind {
    /// Edges that participate in load ordering and must stay acyclic.
    pub fn is_structural(&self) -> bool {
        matches!(self, DependencyKind::Import | DependencyKind::Augment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
    pub kind: DependencyKind,
}

/// Builder-then-frozen dependency graph.
pub struct DependencyGraph {
    modules: BTreeSet<String>,
    edges: Vec<DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            modules: BTreeSet::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_module(&mut self, name: impl Into<String>) {
        self.modules.insert(name.into());
    }

    pub fn add_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        kind: DependencyKind,
    ) {
        self.edges.push(DependencyEdge {
            source: source.into(),
            target: target.into(),
            kind,
        });
    }

    pub fn modules(&self) -> &BTreeSet<String> {
        &self.modules
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Load-time verification: every edge endpoint is a known module and the
    /// import/augment subgraph is acyclic.
    ///
    /// # Errors
    /// `SchemaGraph`: fatal, the load must abort.
    pub fn check_acyclic(&self) -> Result<()> {
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !self.modules.contains(endpoint) {
                    return Err(ConfError::SchemaGraph(format!(
                        "dependency edge references unknown module '{}'",
                        endpoint
                    )));
                }
            }
        }

        // Kahn's algorithm over structural edges; leftovers mean a cycle.
        let mut indegree: BTreeMap<&str, usize> =
            self.modules.iter().map(|m| (m.as_str(), 0)).collect();
        for edge in self.structural_edges() {
            *indegree.entry(edge.target.as_str()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&m, _)| m)
            .collect();
        let mut visited = 0usize;
        while let Some(module) = queue.pop_front() {
            visited += 1;
            for edge in self.structural_edges() {
                if edge.source == module {
                    if let Some(d) = indegree.get_mut(edge.target.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(edge.target.as_str());
                        }
                    }
                }
            }
        }

        if visited != self.modules.len() {
            let cyclic: Vec<&str> = indegree
                .iter()
                .filter(|(_, &d)| d > 0)
                .map(|(&m, _)| m)
                .collect();
            return Err(ConfError::SchemaGraph(format!(
                "import/augment cycle involving: {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    fn structural_edges(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter().filter(|e| e.kind.is_structural())
    }

    /// Transitive closure of `changed` over data-reference edges, traversed
    /// in both directions: a module whose data references a changed module
    /// must be re-validated and notified just like one the change references.
    /// Iteration order is stable (BTreeSet).
    pub fn resolve_required_modules(&self, changed: &BTreeSet<String>) -> BTreeSet<String> {
        let mut required: BTreeSet<String> = changed.clone();
        let mut frontier: VecDeque<String> = changed.iter().cloned().collect();

        while let Some(module) = frontier.pop_front() {
            for edge in &self.edges {
                if edge.kind != DependencyKind::DataRef {
                    continue;
                }
                let neighbor = if edge.source == module {
                    &edge.target
                } else if edge.target == module {
                    &edge.source
                } else {
                    continue;
                };
                if required.insert(neighbor.clone()) {
                    frontier.push_back(neighbor.clone());
                }
            }
        }
        required
    }

    /// Deterministic dispatch order for a module set: topological by
    /// import/augment (dependencies first), lexicographic tie-break.
    pub fn commit_order(&self, modules: &BTreeSet<String>) -> Vec<String> {
        let mut indegree: BTreeMap<&str, usize> =
            modules.iter().map(|m| (m.as_str(), 0)).collect();
        for edge in self.structural_edges() {
            if modules.contains(&edge.source) && modules.contains(&edge.target) {
                // source imports target: target must be dispatched first
                *indegree.entry(edge.source.as_str()).or_insert(0) += 1;
            }
        }

        let mut order = Vec::with_capacity(modules.len());
        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&m, _)| m)
            .collect();

        while let Some(&module) = ready.iter().next() {
            ready.remove(module);
            order.push(module.to_string());
            for edge in self.structural_edges() {
                if edge.target == module && modules.contains(&edge.source) {
                    if let Some(d) = indegree.get_mut(edge.source.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(edge.source.as_str());
                        }
                    }
                }
            }
        }

        // graph was validated acyclic at load; all modules come out
        debug_assert_eq!(order.len(), modules.len());
        order
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
