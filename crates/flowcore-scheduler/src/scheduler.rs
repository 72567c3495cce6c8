//! In-process job scheduler.
//!
//! Jobs live in an explicit `Scheduler` owned by the caller. `tick(now)` fires
//! every enabled job whose next run is due and advances its schedule;
//! `spawn` drives `tick` from a background task.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore_core::config::SchedulerSettings;
use flowcore_core::{
    record_quietly, ActionRecord, ActionRecorder, FlowError, NoopRecorder, RecordKind, Result,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::schedule::ScheduleSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Passed to a job each time it fires.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub name: String,
    pub fired_at: DateTime<Utc>,
    /// 1 for the first run.
    pub run: u64,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, ctx: JobContext) -> anyhow::Result<()> {
        (self)(ctx).await
    }
}

/// Snapshot of a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub spec: ScheduleSpec,
    pub enabled: bool,
    /// `None` once a one-shot has run (or a schedule is exhausted).
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
}

impl JobInfo {
    pub fn is_finished(&self) -> bool {
        self.next_run.is_none()
    }
}

struct Job {
    info: JobInfo,
    handler: Arc<dyn JobHandler>,
}

impl Job {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.info.enabled && self.info.next_run.is_some_and(|next| next <= now)
    }
}

pub struct Scheduler {
    jobs: Mutex<Vec<Job>>,
    check_interval: Duration,
    recorder: Arc<dyn ActionRecorder>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(&SchedulerSettings::default())
    }

    pub fn with_config(settings: &SchedulerSettings) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            check_interval: Duration::from_secs(settings.check_interval_secs.max(1)),
            recorder: Arc::new(NoopRecorder),
        }
    }

    /// Send one record per job run to `recorder`.
    pub fn with_recorder(mut self, recorder: Arc<dyn ActionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule a job relative to the current time.
    pub fn schedule(
        &self,
        name: &str,
        spec: ScheduleSpec,
        handler: impl JobHandler + 'static,
    ) -> Result<JobId> {
        self.schedule_from(name, spec, handler, Utc::now())
    }

    /// Schedule a job with its first run computed from `reference`.
    ///
    /// A one-shot in the past fires on the next tick. A cron expression that
    /// never matches is rejected.
    pub fn schedule_from(
        &self,
        name: &str,
        spec: ScheduleSpec,
        handler: impl JobHandler + 'static,
        reference: DateTime<Utc>,
    ) -> Result<JobId> {
        spec.validate()?;
        let next_run = match &spec {
            ScheduleSpec::At(when) => Some(*when),
            other => other.next_after(reference)?,
        };
        if next_run.is_none() {
            return Err(FlowError::InvalidSchedule(format!("{spec} never fires")));
        }

        let id = JobId::new();
        tracing::info!("📅 Job scheduled: '{}' ({}) [{}]", name, spec, id);
        self.lock().push(Job {
            info: JobInfo {
                id,
                name: name.to_string(),
                spec,
                enabled: true,
                next_run,
                last_run: None,
                run_count: 0,
            },
            handler: Arc::new(handler),
        });
        Ok(id)
    }

    /// Remove a job. Returns whether it existed.
    pub fn unschedule(&self, id: JobId) -> bool {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|job| job.info.id != id);
        let removed = jobs.len() != before;
        if removed {
            tracing::info!("🗑️ Job removed: {}", id);
        }
        removed
    }

    /// Pause or resume a job. Returns whether it existed.
    pub fn set_enabled(&self, id: JobId, enabled: bool) -> bool {
        match self.lock().iter_mut().find(|job| job.info.id == id) {
            Some(job) => {
                job.info.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: JobId) -> Option<JobInfo> {
        self.lock()
            .iter()
            .find(|job| job.info.id == id)
            .map(|job| job.info.clone())
    }

    /// Every job, in scheduling order.
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.lock().iter().map(|job| job.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Earliest upcoming run among enabled jobs.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock()
            .iter()
            .filter(|job| job.info.enabled)
            .filter_map(|job| job.info.next_run)
            .min()
    }

    /// Fire every job due at `now` and return their ids.
    ///
    /// Due jobs run concurrently and `tick` waits for all of them. Job errors
    /// and panics are logged and recorded, never returned.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<JobId> {
        let due: Vec<(JobContext, Arc<dyn JobHandler>)> = {
            let mut jobs = self.lock();
            jobs.iter_mut()
                .filter(|job| job.is_due(now))
                .map(|job| {
                    let info = &mut job.info;
                    info.run_count += 1;
                    info.last_run = Some(now);
                    info.next_run = if info.spec.is_recurring() {
                        info.spec.next_after(now).unwrap_or_else(|e| {
                            tracing::warn!("⚠️ Job '{}' cannot be rescheduled: {e}", info.name);
                            None
                        })
                    } else {
                        None
                    };
                    let ctx = JobContext {
                        job_id: info.id,
                        name: info.name.clone(),
                        fired_at: now,
                        run: info.run_count,
                    };
                    (ctx, job.handler.clone())
                })
                .collect()
        };
        if due.is_empty() {
            return Vec::new();
        }

        let running: Vec<_> = due
            .into_iter()
            .map(|(ctx, handler)| {
                tracing::info!("🔔 Job triggered: '{}' (run {})", ctx.name, ctx.run);
                let meta = ctx.clone();
                (meta, tokio::spawn(async move { handler.run(ctx).await }))
            })
            .collect();
        let (contexts, tasks): (Vec<JobContext>, Vec<_>) = running.into_iter().unzip();
        let outcomes = futures::future::join_all(tasks).await;

        let mut fired = Vec::with_capacity(contexts.len());
        for (ctx, outcome) in contexts.into_iter().zip(outcomes) {
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(join_err) if join_err.is_panic() => Some("job panicked".to_string()),
                Err(_) => Some("job was cancelled".to_string()),
            };
            match &error {
                None => tracing::debug!("✅ Job '{}' finished", ctx.name),
                Some(e) => tracing::error!("❌ Job '{}' failed: {}", ctx.name, e),
            }

            let detail = serde_json::json!({
                "job_id": ctx.job_id,
                "run": ctx.run,
                "fired_at": ctx.fired_at,
                "error": error,
            });
            let outcome = if error.is_none() { "succeeded" } else { "failed" };
            record_quietly(
                self.recorder.as_ref(),
                ActionRecord::new(RecordKind::ScheduledJob, &ctx.name, outcome, detail),
            )
            .await;
            fired.push(ctx.job_id);
        }
        fired
    }

    /// Tick every configured check interval until the handle is aborted.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_every(self.check_interval)
    }

    pub fn spawn_every(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let scheduler = self.clone();
        let every = every.max(Duration::from_millis(1));
        tokio::spawn(async move {
            tracing::info!("⏰ Scheduler started (check every {:?})", every);
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let fired = scheduler.tick(Utc::now()).await;
                if !fired.is_empty() {
                    tracing::debug!("Scheduler tick fired {} job(s)", fired.len());
                }
            }
        })
    }
}
