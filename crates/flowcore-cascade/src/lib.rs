//! # FlowCore Cascade
//!
//! Tiered escalation: a request is offered to an ordered list of tiers
//! (canonically deterministic code → generative inference → agent → human)
//! until one of them succeeds.
//!
//! ```text
//! NotStarted → Running(i) ─┬─ ok ──────────────→ Succeeded
//!                          ├─ fail/timeout ────→ Retrying(i) → Running(i)
//!                          ├─ retries spent ───→ Escalating(i+1)
//!                          └─ skip ────────────→ Skipped(i) → Escalating(i+1)
//! last tier exhausted ─────────────────────────→ AllTiersFailed
//! total budget spent ──────────────────────────→ CascadeTimedOut
//! ```
//!
//! Every attempt lands in [`CascadeMetrics`], which is returned on success
//! and carried by both error variants.
//!
//! A timed-out handler is abandoned, not interrupted: its task keeps running
//! in the background and its result is discarded. Set
//! [`TierPolicy::cancel_on_timeout`] to abort it instead.

pub mod error;
pub mod executor;
pub mod metrics;
pub mod retry;
pub mod tier;

pub use error::{CascadeError, TierFailure, TierSkipped};
pub use executor::{CascadeConfig, CascadeExecutor, CascadeOverrides, CascadeResult};
pub use metrics::{CascadeMetrics, CascadeState, TierAttempt, TierOutcome, Transition};
pub use retry::RetryPolicy;
pub use tier::{default_tier_timeout, Tier, TierHandler, TierPolicy};
