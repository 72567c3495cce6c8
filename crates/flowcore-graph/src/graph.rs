//! Dependency Graph — nodes, dependency edges and incremental cycle checks.
//!
//! Edges are stored on the dependent node (`a depends on b` lives in `a`'s
//! entry). A node may name dependencies that have not been added yet; those
//! are only rejected when an ordering is requested. Cycles are rejected at
//! insertion time, so a graph instance is always acyclic.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flowcore_core::{FlowError, Result};
use serde::{Deserialize, Serialize};

use crate::sort::{self, SortAlgorithm, SortNode};

/// Dependencies declared when a node is added: none, one id or several.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DependsOn {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl DependsOn {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            DependsOn::None => Vec::new(),
            DependsOn::One(id) => vec![id],
            DependsOn::Many(ids) => ids,
        }
    }
}

impl From<&str> for DependsOn {
    fn from(id: &str) -> Self {
        DependsOn::One(id.to_string())
    }
}

impl From<String> for DependsOn {
    fn from(id: String) -> Self {
        DependsOn::One(id)
    }
}

impl From<Vec<String>> for DependsOn {
    fn from(ids: Vec<String>) -> Self {
        DependsOn::Many(ids)
    }
}

impl From<Vec<&str>> for DependsOn {
    fn from(ids: Vec<&str>) -> Self {
        DependsOn::Many(ids.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for DependsOn {
    fn from(ids: &[&str]) -> Self {
        DependsOn::Many(ids.iter().map(|id| id.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for DependsOn {
    fn from(ids: [&str; N]) -> Self {
        DependsOn::Many(ids.iter().map(|id| id.to_string()).collect())
    }
}

/// A dependency edge: `from` depends on `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeView {
    pub from: String,
    pub to: String,
}

/// Serializable projection of a graph, for inspection and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SortNode>,
    #[serde(default)]
    pub edges: Vec<EdgeView>,
}

struct NodeEntry<P> {
    depends_on: Vec<String>,
    payload: P,
}

struct GraphInner<P> {
    /// Insertion order.
    order: Vec<String>,
    nodes: HashMap<String, NodeEntry<P>>,
}

impl<P> GraphInner<P> {
    /// Path `start -> ... -> target` following declared dependencies,
    /// including dependencies on ids that are not nodes yet.
    fn dependency_path(&self, start: &str, target: &str) -> Option<Vec<String>> {
        if start == target {
            return Some(vec![start.to_string()]);
        }
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut stack: Vec<&str> = vec![start];

        while let Some(current) = stack.pop() {
            let Some(entry) = self.nodes.get(current) else {
                continue;
            };
            for dep in &entry.depends_on {
                let dep = dep.as_str();
                if !visited.insert(dep) {
                    continue;
                }
                parent.insert(dep, current);
                if dep == target {
                    let mut path = vec![dep.to_string()];
                    let mut cursor = dep;
                    while let Some(&prev) = parent.get(cursor) {
                        path.push(prev.to_string());
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                stack.push(dep);
            }
        }
        None
    }

    /// Cycle that adding `from -> to` would close, as `[from, to, ..., from]`.
    fn cycle_through(&self, from: &str, to: &str) -> Option<Vec<String>> {
        self.dependency_path(to, from).map(|path| {
            let mut cycle = Vec::with_capacity(path.len() + 1);
            cycle.push(from.to_string());
            cycle.extend(path);
            cycle
        })
    }

    fn sort_nodes(&self) -> Vec<SortNode> {
        self.order
            .iter()
            .filter_map(|id| {
                self.nodes.get(id).map(|entry| SortNode {
                    id: id.clone(),
                    depends_on: entry.depends_on.clone(),
                })
            })
            .collect()
    }

    /// Node list with every reference verified to resolve.
    fn resolved_nodes(&self) -> Result<Vec<SortNode>> {
        let nodes = self.sort_nodes();
        for node in &nodes {
            if let Some(missing) = node.depends_on.iter().find(|d| !self.nodes.contains_key(*d)) {
                return Err(FlowError::MissingDependency {
                    node: node.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(nodes)
    }
}

/// Thread-safe dependency graph carrying an opaque payload per node.
///
/// Every mutation runs its validation and its write under one lock, so a
/// failed call leaves the graph untouched and readers never observe a
/// half-applied edge.
pub struct DependencyGraph<P = ()> {
    inner: RwLock<GraphInner<P>>,
}

impl<P> DependencyGraph<P> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                order: Vec::new(),
                nodes: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner<P>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner<P>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node with a payload.
    ///
    /// Dependencies may reference ids that do not exist yet. Fails with
    /// `DuplicateNode` if `id` is taken and with `CircularDependency` if a
    /// previously declared dependency on `id` would close a loop.
    pub fn add_node_with_payload(
        &self,
        id: &str,
        depends_on: impl Into<DependsOn>,
        payload: P,
    ) -> Result<()> {
        let mut inner = self.write();
        if inner.nodes.contains_key(id) {
            return Err(FlowError::DuplicateNode(id.to_string()));
        }

        let mut deps: Vec<String> = Vec::new();
        for dep in depends_on.into().into_vec() {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        for dep in &deps {
            if let Some(cycle) = inner.cycle_through(id, dep) {
                return Err(FlowError::CircularDependency { path: cycle });
            }
        }

        tracing::debug!("Graph: added node '{}' (depends on {:?})", id, deps);
        inner.order.push(id.to_string());
        inner.nodes.insert(
            id.to_string(),
            NodeEntry {
                depends_on: deps,
                payload,
            },
        );
        Ok(())
    }

    /// Declare that `from` depends on `to`. Both nodes must exist.
    ///
    /// Adding an edge that already exists is a no-op.
    pub fn add_edge(&self, from: &str, to: &str) -> Result<()> {
        let mut inner = self.write();
        if !inner.nodes.contains_key(from) {
            return Err(FlowError::NodeNotFound(from.to_string()));
        }
        if !inner.nodes.contains_key(to) {
            return Err(FlowError::MissingDependency {
                node: from.to_string(),
                dependency: to.to_string(),
            });
        }
        if inner
            .nodes
            .get(from)
            .is_some_and(|entry| entry.depends_on.iter().any(|d| d == to))
        {
            return Ok(());
        }
        if let Some(cycle) = inner.cycle_through(from, to) {
            tracing::debug!("Graph: rejected edge {} -> {}", from, to);
            return Err(FlowError::CircularDependency { path: cycle });
        }
        if let Some(entry) = inner.nodes.get_mut(from) {
            entry.depends_on.push(to.to_string());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().nodes.contains_key(id)
    }

    /// Node ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// Declared dependencies of a node (possibly including unresolved ids).
    pub fn dependencies_of(&self, id: &str) -> Option<Vec<String>> {
        self.read().nodes.get(id).map(|entry| entry.depends_on.clone())
    }

    /// Nodes that depend directly on `id`, in insertion order.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter(|candidate| {
                inner
                    .nodes
                    .get(*candidate)
                    .is_some_and(|entry| entry.depends_on.iter().any(|d| d == id))
            })
            .cloned()
            .collect()
    }

    /// Ids referenced as dependencies that are not nodes of this graph.
    pub fn unresolved(&self) -> Vec<String> {
        let inner = self.read();
        let mut missing = Vec::new();
        for id in &inner.order {
            if let Some(entry) = inner.nodes.get(id) {
                for dep in &entry.depends_on {
                    if !inner.nodes.contains_key(dep) && !missing.contains(dep) {
                        missing.push(dep.clone());
                    }
                }
            }
        }
        missing
    }

    /// Nodes in the sorter's input shape, insertion order.
    pub fn nodes(&self) -> Vec<SortNode> {
        self.read().sort_nodes()
    }

    /// A valid execution order. Fails with `MissingDependency` naming the
    /// first unresolved reference.
    pub fn execution_order(&self, algorithm: SortAlgorithm) -> Result<Vec<String>> {
        let nodes = self.read().resolved_nodes()?;
        algorithm.sort(&nodes)
    }

    /// Execution levels (batches of mutually independent nodes).
    pub fn execution_levels(&self) -> Result<Vec<Vec<String>>> {
        let nodes = self.read().resolved_nodes()?;
        sort::execution_levels(&nodes)
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self.nodes();
        let edges = nodes
            .iter()
            .flat_map(|node| {
                node.depends_on.iter().map(move |dep| EdgeView {
                    from: node.id.clone(),
                    to: dep.clone(),
                })
            })
            .collect();
        GraphSnapshot { nodes, edges }
    }

    /// JSON projection of nodes and edges, for inspection only.
    pub fn to_json(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        serde_json::json!({
            "nodes": snapshot.nodes.iter().map(|n| serde_json::json!({
                "id": n.id,
                "dependsOn": n.depends_on,
            })).collect::<Vec<_>>(),
            "edges": snapshot.edges.iter().map(|e| serde_json::json!({
                "from": e.from,
                "to": e.to,
            })).collect::<Vec<_>>(),
        })
    }
}

impl<P: Clone> DependencyGraph<P> {
    pub fn payload(&self, id: &str) -> Option<P> {
        self.read().nodes.get(id).map(|entry| entry.payload.clone())
    }
}

impl<P: Default> DependencyGraph<P> {
    /// Add a node with a default payload.
    pub fn add_node(&self, id: &str, depends_on: impl Into<DependsOn>) -> Result<()> {
        self.add_node_with_payload(id, depends_on, P::default())
    }

    /// Rebuild a graph from a snapshot (nodes first, then listed edges).
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self> {
        let graph = Self::new();
        for node in &snapshot.nodes {
            graph.add_node(&node.id, node.depends_on.clone())?;
        }
        for edge in &snapshot.edges {
            graph.add_edge(&edge.from, &edge.to)?;
        }
        Ok(graph)
    }
}

impl<P> Default for DependencyGraph<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_order() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("build", DependsOn::None).unwrap();
        graph.add_node("test", "build").unwrap();
        graph.add_node("deploy", ["test", "build"]).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(
            graph.execution_order(SortAlgorithm::Kahn).unwrap(),
            vec!["build", "test", "deploy"]
        );
        assert_eq!(graph.dependents_of("build"), vec!["test", "deploy"]);
    }

    #[test]
    fn test_duplicate_node() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", DependsOn::None).unwrap();
        let err = graph.add_node("a", DependsOn::None).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateNode(id) if id == "a"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_forward_reference_resolves_later() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("deploy", "build").unwrap();

        match graph.execution_order(SortAlgorithm::DepthFirst) {
            Err(FlowError::MissingDependency { node, dependency }) => {
                assert_eq!(node, "deploy");
                assert_eq!(dependency, "build");
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
        assert_eq!(graph.unresolved(), vec!["build"]);

        graph.add_node("build", DependsOn::None).unwrap();
        assert_eq!(
            graph.execution_order(SortAlgorithm::DepthFirst).unwrap(),
            vec!["build", "deploy"]
        );
    }

    #[test]
    fn test_edge_cycle_rejected_with_path() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", DependsOn::None).unwrap();
        graph.add_node("b", "a").unwrap();
        graph.add_node("c", "b").unwrap();

        let err = graph.add_edge("a", "c").unwrap_err();
        match &err {
            FlowError::CircularDependency { path } => {
                assert_eq!(path, &vec!["a", "c", "b", "a"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
        // graph unchanged
        assert_eq!(graph.dependencies_of("a").unwrap(), Vec::<String>::new());
        assert!(graph.execution_levels().is_ok());
    }

    #[test]
    fn test_forward_declaration_cycle_rejected_at_add_node() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", "b").unwrap();
        let err = graph.add_node("b", "a").unwrap_err();
        assert_eq!(err.cycle_path().unwrap(), ["b", "a", "b"]);
        assert!(!graph.contains("b"));
    }

    #[test]
    fn test_self_edge() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", DependsOn::None).unwrap();
        let err = graph.add_edge("a", "a").unwrap_err();
        assert_eq!(err.cycle_path().unwrap(), ["a", "a"]);

        let err = graph.add_node("s", "s").unwrap_err();
        assert_eq!(err.cycle_path().unwrap(), ["s", "s"]);
    }

    #[test]
    fn test_edge_endpoints_must_exist() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", DependsOn::None).unwrap();
        assert!(matches!(graph.add_edge("x", "a"), Err(FlowError::NodeNotFound(_))));
        assert!(matches!(
            graph.add_edge("a", "x"),
            Err(FlowError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", DependsOn::None).unwrap();
        graph.add_node("b", "a").unwrap();
        graph.add_edge("b", "a").unwrap();
        assert_eq!(graph.dependencies_of("b").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_to_json_and_snapshot_roundtrip() {
        let graph: DependencyGraph = DependencyGraph::new();
        graph.add_node("a", DependsOn::None).unwrap();
        graph.add_node("b", "a").unwrap();

        let json = graph.to_json();
        assert_eq!(json["nodes"][1]["id"], "b");
        assert_eq!(json["nodes"][1]["dependsOn"][0], "a");
        assert_eq!(json["edges"][0]["from"], "b");
        assert_eq!(json["edges"][0]["to"], "a");

        let rebuilt: DependencyGraph = DependencyGraph::from_snapshot(&graph.snapshot()).unwrap();
        assert_eq!(rebuilt.ids(), graph.ids());
    }

    #[test]
    fn test_payloads() {
        let graph: DependencyGraph<u32> = DependencyGraph::new();
        graph.add_node_with_payload("a", DependsOn::None, 7).unwrap();
        assert_eq!(graph.payload("a"), Some(7));
        assert_eq!(graph.payload("b"), None);
    }

    #[test]
    fn test_concurrent_edge_insertion_stays_acyclic() {
        use std::sync::Arc;

        let graph: Arc<DependencyGraph> = Arc::new(DependencyGraph::new());
        for id in ["a", "b", "c", "d"] {
            graph.add_node(id, DependsOn::None).unwrap();
        }
        let pairs = [("a", "b"), ("b", "c"), ("c", "d"), ("d", "a"), ("b", "a"), ("c", "a")];
        let handles: Vec<_> = pairs
            .into_iter()
            .map(|(from, to)| {
                let graph = Arc::clone(&graph);
                std::thread::spawn(move || {
                    let _ = graph.add_edge(from, to);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(graph.execution_order(SortAlgorithm::Kahn).is_ok());
    }
}
