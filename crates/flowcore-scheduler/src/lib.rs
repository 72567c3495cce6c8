//! # FlowCore Scheduler
//!
//! Time-based triggers for workflows.
//! - `cron` — 5-field cron evaluator
//! - `schedule` — `ScheduleSpec` and the `ScheduleResolver` contract
//! - `scheduler` — job registry with `tick` and a background loop

pub mod cron;
pub mod schedule;
pub mod scheduler;

pub use cron::CronExpr;
pub use schedule::{ScheduleResolver, ScheduleSpec};
pub use scheduler::{JobContext, JobHandler, JobId, JobInfo, Scheduler};
