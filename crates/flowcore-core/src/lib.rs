//! # FlowCore Core
//!
//! Shared building blocks for the orchestration crates:
//! - `error` — the graph/sort/schedule error taxonomy
//! - `config` — TOML configuration with per-section defaults
//! - `record` — the optional persistence collaborator (`ActionRecorder`)

pub mod config;
pub mod error;
pub mod record;

pub use config::FlowConfig;
pub use error::{FlowError, Result};
pub use record::{
    record_quietly, ActionRecord, ActionRecorder, MemoryRecorder, NoopRecorder, RecordKind,
};
