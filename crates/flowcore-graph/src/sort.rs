//! Topological ordering over an ad hoc node list.
//!
//! Two independent algorithms share one input shape (`SortNode`):
//! - **Kahn** — repeatedly emit zero in-degree nodes, ties broken by the
//!   position of the node in the input list.
//! - **Depth-first** — three-colour DFS with an explicit stack, dependencies
//!   visited in declaration order.
//!
//! Both reject the same inputs: duplicate ids, references to ids that are not
//! in the list (`MissingNode`) and cycles (`CycleDetected` with a closed path,
//! e.g. `a -> b -> a`, read as "a depends on b depends on a").

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use flowcore_core::{FlowError, Result};
use serde::{Deserialize, Serialize};

/// A node as seen by the sorter: an id plus the ids it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortNode {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SortNode {
    pub fn new<I, S>(id: &str, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            depends_on: depends_on.into_iter().map(Into::into).collect(),
        }
    }

    /// A node without dependencies.
    pub fn leaf(id: &str) -> Self {
        Self {
            id: id.to_string(),
            depends_on: Vec::new(),
        }
    }
}

/// Which ordering algorithm to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortAlgorithm {
    #[default]
    Kahn,
    DepthFirst,
}

impl SortAlgorithm {
    pub fn sort(self, nodes: &[SortNode]) -> Result<Vec<String>> {
        match self {
            SortAlgorithm::Kahn => kahn_sort(nodes),
            SortAlgorithm::DepthFirst => dfs_sort(nodes),
        }
    }
}

impl fmt::Display for SortAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortAlgorithm::Kahn => write!(f, "kahn"),
            SortAlgorithm::DepthFirst => write!(f, "dfs"),
        }
    }
}

impl FromStr for SortAlgorithm {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kahn" => Ok(SortAlgorithm::Kahn),
            "dfs" | "depth_first" | "depth-first" => Ok(SortAlgorithm::DepthFirst),
            other => Err(FlowError::InvalidArgument(format!(
                "unknown sort algorithm '{other}' (expected 'kahn' or 'dfs')"
            ))),
        }
    }
}

/// Node list resolved to indices. Dependencies are deduplicated and keep
/// their first-declared order.
struct Indexed<'a> {
    ids: Vec<&'a str>,
    deps: Vec<Vec<usize>>,
}

impl<'a> Indexed<'a> {
    fn build(nodes: &'a [SortNode]) -> Result<Self> {
        let mut position: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if position.insert(node.id.as_str(), idx).is_some() {
                return Err(FlowError::DuplicateNode(node.id.clone()));
            }
        }

        let mut deps = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut seen = HashSet::new();
            let mut resolved = Vec::with_capacity(node.depends_on.len());
            for dep in &node.depends_on {
                let idx = *position
                    .get(dep.as_str())
                    .ok_or_else(|| FlowError::MissingNode {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    })?;
                if seen.insert(idx) {
                    resolved.push(idx);
                }
            }
            deps.push(resolved);
        }

        Ok(Self {
            ids: nodes.iter().map(|n| n.id.as_str()).collect(),
            deps,
        })
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.len()];
        for (node, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(node);
            }
        }
        dependents
    }

    fn names(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.ids[i].to_string()).collect()
    }

    /// Kahn's algorithm over indices.
    fn kahn_order(&self) -> Result<Vec<usize>> {
        let dependents = self.dependents();
        let mut unmet: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.len()).filter(|&i| unmet[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &dependent in &dependents[idx] {
                unmet[dependent] -= 1;
                if unmet[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < self.len() {
            let path = self.stuck_cycle(&unmet);
            tracing::debug!("Kahn sort stalled with {} unsorted nodes", self.len() - order.len());
            return Err(FlowError::CycleDetected { path });
        }
        Ok(order)
    }

    /// Walk from the first stalled node along stalled dependencies until a
    /// node repeats. Every stalled node has at least one stalled dependency,
    /// so the walk always closes.
    fn stuck_cycle(&self, unmet: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.len()).find(|&i| unmet[i] > 0) else {
            return Vec::new();
        };
        let mut walk = vec![start];
        let mut seen_at: HashMap<usize, usize> = HashMap::from([(start, 0)]);
        let mut current = start;
        loop {
            let Some(&next) = self.deps[current].iter().find(|&&d| unmet[d] > 0) else {
                return self.names(&walk);
            };
            if let Some(&pos) = seen_at.get(&next) {
                let mut cycle = walk[pos..].to_vec();
                cycle.push(next);
                return self.names(&cycle);
            }
            seen_at.insert(next, walk.len());
            walk.push(next);
            current = next;
        }
    }
}

/// Kahn's algorithm. Ties are broken by input position.
pub fn kahn_sort(nodes: &[SortNode]) -> Result<Vec<String>> {
    let graph = Indexed::build(nodes)?;
    let order = graph.kahn_order()?;
    Ok(graph.names(&order))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first sort with unvisited / in-progress / done marking.
pub fn dfs_sort(nodes: &[SortNode]) -> Result<Vec<String>> {
    let graph = Indexed::build(nodes)?;
    let mut marks = vec![Mark::Unvisited; graph.len()];
    let mut order = Vec::with_capacity(graph.len());

    for root in 0..graph.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        // (node, index of the next dependency to visit)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        marks[root] = Mark::InProgress;

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            if let Some(&dep) = graph.deps[node].get(next) {
                frame.1 += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        stack.push((dep, 0));
                    }
                    Mark::InProgress => {
                        let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let mut cycle: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                        cycle.push(dep);
                        return Err(FlowError::CycleDetected {
                            path: graph.names(&cycle),
                        });
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                order.push(node);
                stack.pop();
            }
        }
    }

    Ok(graph.names(&order))
}

/// Group nodes into batches that can run concurrently.
///
/// A node lands in level `1 + max(level of its dependencies)`, so nodes
/// without dependencies are always in level 0 and no node shares a level
/// with one of its dependencies. Within a level nodes keep input order.
pub fn execution_levels(nodes: &[SortNode]) -> Result<Vec<Vec<String>>> {
    let graph = Indexed::build(nodes)?;
    let order = graph.kahn_order()?;

    let mut level = vec![0usize; graph.len()];
    for &idx in &order {
        level[idx] = graph.deps[idx]
            .iter()
            .map(|&dep| level[dep] + 1)
            .max()
            .unwrap_or(0);
    }

    let depth = level.iter().max().map_or(0, |deepest| deepest + 1);
    let mut levels: Vec<Vec<String>> = vec![Vec::new(); depth];
    for (idx, &lvl) in level.iter().enumerate() {
        levels[lvl].push(graph.ids[idx].to_string());
    }
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Vec<SortNode> {
        vec![
            SortNode::new("deploy", ["test", "lint"]),
            SortNode::new("test", ["build"]),
            SortNode::new("lint", ["build"]),
            SortNode::leaf("build"),
        ]
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_kahn_diamond() {
        let order = kahn_sort(&diamond()).unwrap();
        assert_eq!(order, vec!["build", "test", "lint", "deploy"]);
    }

    #[test]
    fn test_dfs_diamond() {
        let order = dfs_sort(&diamond()).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "build") < position(&order, "test"));
        assert!(position(&order, "build") < position(&order, "lint"));
        assert!(position(&order, "lint") < position(&order, "deploy"));
        assert!(position(&order, "test") < position(&order, "deploy"));
    }

    #[test]
    fn test_kahn_ties_follow_insertion_order() {
        let nodes = vec![SortNode::leaf("c"), SortNode::leaf("a"), SortNode::leaf("b")];
        assert_eq!(kahn_sort(&nodes).unwrap(), vec!["c", "a", "b"]);
        assert_eq!(kahn_sort(&nodes).unwrap(), kahn_sort(&nodes).unwrap());
    }

    #[test]
    fn test_missing_node() {
        let nodes = vec![SortNode::new("a", ["ghost"])];
        for algorithm in [SortAlgorithm::Kahn, SortAlgorithm::DepthFirst] {
            match algorithm.sort(&nodes) {
                Err(FlowError::MissingNode { node, dependency }) => {
                    assert_eq!(node, "a");
                    assert_eq!(dependency, "ghost");
                }
                other => panic!("expected MissingNode, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let nodes = vec![SortNode::leaf("a"), SortNode::leaf("a")];
        assert!(matches!(kahn_sort(&nodes), Err(FlowError::DuplicateNode(id)) if id == "a"));
    }

    #[test]
    fn test_cycle_paths_close() {
        let nodes = vec![
            SortNode::new("a", ["b"]),
            SortNode::new("b", ["c"]),
            SortNode::new("c", ["a"]),
            SortNode::leaf("d"),
        ];
        for algorithm in [SortAlgorithm::Kahn, SortAlgorithm::DepthFirst] {
            let err = algorithm.sort(&nodes).unwrap_err();
            let path = err.cycle_path().unwrap();
            assert_eq!(path.len(), 4, "{algorithm}: {path:?}");
            assert_eq!(path.first(), path.last());
            assert!(matches!(err, FlowError::CycleDetected { .. }));
        }
    }

    #[test]
    fn test_self_loop() {
        let nodes = vec![SortNode::new("a", ["a"])];
        let err = dfs_sort(&nodes).unwrap_err();
        assert_eq!(err.cycle_path().unwrap(), ["a", "a"]);
        let err = kahn_sort(&nodes).unwrap_err();
        assert_eq!(err.cycle_path().unwrap(), ["a", "a"]);
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let nodes = vec![SortNode::leaf("a"), SortNode::new("b", ["a", "a"])];
        assert_eq!(kahn_sort(&nodes).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_levels() {
        let levels = execution_levels(&diamond()).unwrap();
        assert_eq!(
            levels,
            vec![vec!["build"], vec!["test", "lint"], vec!["deploy"]]
        );
        assert!(execution_levels(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut nodes = vec![SortNode::leaf("n0")];
        for i in 1..50_000 {
            nodes.push(SortNode::new(&format!("n{i}"), [format!("n{}", i - 1)]));
        }
        nodes.reverse();
        let order = dfs_sort(&nodes).unwrap();
        assert_eq!(order.first().map(String::as_str), Some("n0"));
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("DFS".parse::<SortAlgorithm>().unwrap(), SortAlgorithm::DepthFirst);
        assert_eq!("kahn".parse::<SortAlgorithm>().unwrap(), SortAlgorithm::Kahn);
        assert!("bogus".parse::<SortAlgorithm>().is_err());
    }
}
