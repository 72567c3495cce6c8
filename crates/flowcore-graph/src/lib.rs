//! # FlowCore Graph
//!
//! Dependency ordering for units of work.
//!
//! ```text
//! DependencyGraph (add_node / add_edge, cycle check on every insert)
//!   └── execution_order(Kahn | DepthFirst) → Vec<id>
//!   └── execution_levels()                 → Vec<Vec<id>>  (parallel batches)
//! ```
//!
//! The sorter functions in [`sort`] also work on ad hoc node lists that never
//! went through a `DependencyGraph`.

pub mod graph;
pub mod sort;

pub use graph::{DependencyGraph, DependsOn, EdgeView, GraphSnapshot};
pub use sort::{dfs_sort, execution_levels, kahn_sort, SortAlgorithm, SortNode};
