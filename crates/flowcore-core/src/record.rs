//! Action recording — the optional durable-history collaborator.
//!
//! The orchestration crates never require persistence. When no recorder is
//! configured they use `NoopRecorder`; a failing recorder is logged and
//! otherwise ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// What produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    EventDelivery,
    Cascade,
    ScheduledJob,
}

/// One entry of durable history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: RecordKind,
    /// Event name, cascade tier list or job name.
    pub subject: String,
    /// Short outcome label ("delivered", "succeeded", "all_tiers_failed", ...).
    pub outcome: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(kind: RecordKind, subject: &str, outcome: &str, detail: serde_json::Value) -> Self {
        Self {
            kind,
            subject: subject.to_string(),
            outcome: outcome.to_string(),
            detail,
            recorded_at: Utc::now(),
        }
    }
}

/// Sink for action/event history.
#[async_trait]
pub trait ActionRecorder: Send + Sync {
    async fn record(&self, record: ActionRecord) -> anyhow::Result<()>;
}

/// Recorder used when no persistence is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

#[async_trait]
impl ActionRecorder for NoopRecorder {
    async fn record(&self, _record: ActionRecord) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory recorder, handy for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<ActionRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<ActionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ActionRecorder for MemoryRecorder {
    async fn record(&self, record: ActionRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

/// Record and swallow failures with a warning.
pub async fn record_quietly(recorder: &dyn ActionRecorder, record: ActionRecord) {
    let subject = record.subject.clone();
    if let Err(e) = recorder.record(record).await {
        tracing::warn!("⚠️ Failed to record action for '{}': {e}", subject);
    }
}
