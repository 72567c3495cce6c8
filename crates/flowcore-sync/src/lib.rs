//! # FlowCore Sync
//!
//! Synchronization primitives for running independent work on tokio.
//!
//! ## Primitives
//! ```text
//! wait_for_all(tasks, timeout)        → every result, index-aligned
//! wait_for_any(n, tasks, timeout)     → first n successes + pending handles
//! Barrier::new(n).arrive(x) / wait()  → arrival counting with progress
//! with_concurrency_limit(tasks, k)    → at most k in flight, fail fast
//! execute_plan(graph, k, run)         → dependency levels, one after another
//! ```
//!
//! Tasks are plain futures; they start only when the coordinator spawns
//! them. On timeout a task that is still running is abandoned (detached),
//! not interrupted.

pub mod barrier;
pub mod error;
pub mod join;
pub mod limit;
pub mod plan;
mod task;

pub use barrier::{Barrier, BarrierState, Progress};
pub use error::{BarrierError, BarrierTimeout, TaskError, TaskFailure, WaitError};
pub use join::{wait_for_all, wait_for_any, AnyOutcome};
pub use limit::{with_concurrency_limit, with_concurrency_limit_collect};
pub use plan::{execute_plan, execute_plan_with, PlanError, PlanOptions, PlanReport};
pub use task::PendingTask;
