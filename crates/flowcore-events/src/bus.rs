//! Event bus: FIFO queue, one delivery at a time, isolated handlers.
//!
//! ```text
//! emit(event) → queue.push_back ─┐
//!                                 ├─ already draining? return
//!                                 └─ drain: pop_front → deliver → repeat
//! deliver(event) → parse Noun.verb → matching handlers
//!                → groups (handler ordering) → handlers of a group concurrently
//! ```
//!
//! Handlers receive a handle to the bus that only enqueues. Their follow-up
//! events are delivered by the drain loop once the current delivery is over,
//! so chains of follow-up events never grow the stack and a handler never
//! waits on the delivery it is part of.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use flowcore_core::config::EventSettings;
use flowcore_core::{record_quietly, ActionRecord, ActionRecorder, NoopRecorder, RecordKind};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventContext, EventName};
use crate::registry::{delivery_groups, EventRegistry};

/// A handler that failed during a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: String,
}

/// What happened to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub event: String,
    /// The name did not parse as `Noun.verb`; nothing ran.
    pub malformed: bool,
    /// Delivered from inside a handler: the event was queued instead and
    /// runs after the current delivery.
    pub queued: bool,
    /// Handlers that completed, in completion order within each group.
    pub succeeded: Vec<String>,
    pub failed: Vec<HandlerFailure>,
}

impl DeliveryReport {
    pub fn handlers_run(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        !self.malformed && self.failed.is_empty()
    }
}

struct Queued {
    event: String,
    data: serde_json::Value,
}

struct BusInner {
    registry: Arc<EventRegistry>,
    queue: Mutex<VecDeque<Queued>>,
    draining: AtomicBool,
    /// Held for the whole of a delivery so deliveries never overlap.
    delivery: tokio::sync::Mutex<()>,
    settings: EventSettings,
    recorder: Arc<dyn ActionRecorder>,
}

/// Resets the drain flag even if the draining future is dropped mid-way.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cheap to clone; clones share the queue and the registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
    /// Handle given to handlers: emits and deliveries only enqueue.
    in_handler: bool,
}

impl EventBus {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self::with_config(registry, &EventSettings::default())
    }

    pub fn with_config(registry: Arc<EventRegistry>, settings: &EventSettings) -> Self {
        Self::build(registry, settings.clone(), Arc::new(NoopRecorder))
    }

    fn build(
        registry: Arc<EventRegistry>,
        settings: EventSettings,
        recorder: Arc<dyn ActionRecorder>,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                delivery: tokio::sync::Mutex::new(()),
                settings,
                recorder,
            }),
            in_handler: false,
        }
    }

    /// Same registry and settings, delivery records sent to `recorder`.
    pub fn with_recorder(self, recorder: Arc<dyn ActionRecorder>) -> Self {
        Self::build(
            self.inner.registry.clone(),
            self.inner.settings.clone(),
            recorder,
        )
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.inner.registry
    }

    pub fn queue_len(&self) -> usize {
        self.queue().len()
    }

    /// The handle passed to handlers through [`EventContext`].
    pub(crate) fn handler_handle(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            in_handler: true,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, event: &str, data: serde_json::Value) {
        let depth = {
            let mut queue = self.queue();
            queue.push_back(Queued {
                event: event.to_string(),
                data,
            });
            queue.len()
        };
        if depth > self.inner.settings.queue_warn_threshold {
            tracing::warn!("⚠️ Event queue depth {} (last: {})", depth, event);
        }
    }

    /// Queue an event and, unless a drain is already running, deliver
    /// everything queued. Never fails: handler errors are logged.
    ///
    /// From inside a handler this only queues.
    pub async fn emit(&self, event: &str, data: serde_json::Value) {
        self.enqueue(event, data);
        if !self.in_handler {
            self.drain().await;
        }
    }

    /// Deliver queued events until the queue is empty, unless another drain
    /// is already doing so.
    async fn drain(&self) {
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _guard = DrainGuard(&self.inner.draining);
                loop {
                    let next = self.queue().pop_front();
                    let Some(queued) = next else { break };
                    self.deliver_now(&queued.event, queued.data).await;
                }
            }
            // An emit may have queued between the last pop and the flag reset.
            if self.queue().is_empty() {
                return;
            }
        }
    }

    /// Deliver one event right away, bypassing the queue, then deliver any
    /// follow-up events its handlers emitted.
    ///
    /// Waits for any delivery in progress. Called from inside a handler the
    /// event is queued instead and the returned report has `queued` set.
    pub async fn deliver(&self, event: &str, data: serde_json::Value) -> DeliveryReport {
        if self.in_handler {
            self.enqueue(event, data);
            return DeliveryReport {
                event: event.to_string(),
                queued: true,
                ..DeliveryReport::default()
            };
        }
        let report = self.deliver_now(event, data).await;
        self.drain().await;
        report
    }

    async fn deliver_now(&self, event: &str, data: serde_json::Value) -> DeliveryReport {
        let _serial = self.inner.delivery.lock().await;
        let mut report = DeliveryReport {
            event: event.to_string(),
            ..DeliveryReport::default()
        };

        let Some(name) = EventName::parse(event) else {
            tracing::warn!("⚠️ Dropping malformed event name '{}' (expected Noun.verb)", event);
            report.malformed = true;
            return report;
        };

        let handlers = self.inner.registry.matching(&name.noun, &name.verb);
        if handlers.is_empty() {
            tracing::debug!("No handlers for {}", name);
            return report;
        }
        tracing::debug!("📨 Delivering {} to {} handler(s)", name, handlers.len());

        let envelope = Arc::new(Event {
            name,
            data,
            emitted_at: Utc::now(),
        });
        for group in delivery_groups(handlers) {
            let running: Vec<_> = group
                .into_iter()
                .map(|registration| {
                    let label = registration.label();
                    let handler = registration.handler.clone();
                    let ctx = EventContext::new(envelope.clone(), self.handler_handle());
                    let task = tokio::spawn(async move { handler.handle(ctx).await });
                    (label, task)
                })
                .collect();

            let (labels, tasks): (Vec<String>, Vec<_>) = running.into_iter().unzip();
            let outcomes = futures::future::join_all(tasks).await;
            for (label, outcome) in labels.into_iter().zip(outcomes) {
                let error = match outcome {
                    Ok(Ok(())) => {
                        report.succeeded.push(label);
                        continue;
                    }
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(join_err) if join_err.is_panic() => "handler panicked".to_string(),
                    Err(_) => "handler was cancelled".to_string(),
                };
                tracing::error!("❌ Handler {} for {} failed: {}", label, event, error);
                report.failed.push(HandlerFailure {
                    handler: label,
                    error,
                });
            }
        }

        if self.inner.settings.record_deliveries {
            let outcome = if report.failed.is_empty() {
                "delivered"
            } else {
                "partial_failure"
            };
            let detail = serde_json::to_value(&report).unwrap_or_default();
            record_quietly(
                self.inner.recorder.as_ref(),
                ActionRecord::new(RecordKind::EventDelivery, event, outcome, detail),
            )
            .await;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use crate::registry::HandlerDependencies;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(EventRegistry::new()))
    }

    #[tokio::test]
    async fn test_unmatched_event_is_noop() {
        let recorder = Arc::new(flowcore_core::MemoryRecorder::new());
        let bus = bus().with_recorder(recorder.clone());
        bus.registry().register("Customer", "created", |_ctx: EventContext| async {
            Ok::<(), anyhow::Error>(())
        });

        let report = bus.deliver("Order.placed", serde_json::json!({"id": 7})).await;
        assert_eq!(report.handlers_run(), 0);
        assert!(report.is_clean());
        assert!(recorder.records().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_name_is_dropped() {
        let bus = bus();
        let report = bus.deliver("not-an-event", serde_json::Value::Null).await;
        assert!(report.malformed);
        bus.emit("also bad", serde_json::Value::Null).await;
        assert_eq!(bus.queue_len(), 0);
        assert!(!bus.is_draining());
    }

    #[tokio::test]
    async fn test_handler_sees_payload() {
        let bus = bus();
        let total = Arc::new(AtomicUsize::new(0));
        let sink = total.clone();
        bus.registry().register("Invoice", "paid", move |ctx: EventContext| {
            let sink = sink.clone();
            async move {
                let amount = ctx.data()["amount"].as_u64().unwrap_or_default();
                sink.fetch_add(amount as usize, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        });

        bus.emit("Invoice.paid", serde_json::json!({"amount": 40})).await;
        bus.emit("Invoice.paid", serde_json::json!({"amount": 2})).await;
        assert_eq!(total.load(Ordering::SeqCst), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_handlers_wait_for_predecessors() {
        let bus = bus();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, after, delay) in [("email", Some("save"), 0u64), ("save", None, 50)] {
            let log = log.clone();
            let deps = match after {
                Some(after) => HandlerDependencies::named(name).after(after),
                None => HandlerDependencies::named(name),
            };
            bus.registry().register_with(
                "Customer",
                "created",
                move |_ctx: EventContext| {
                    let log = log.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        log.lock().unwrap().push(name);
                        Ok::<(), anyhow::Error>(())
                    }
                },
                deps,
            );
        }

        let report = bus.deliver("Customer.created", serde_json::Value::Null).await;
        assert_eq!(report.succeeded, vec!["save", "email"]);
        assert_eq!(*log.lock().unwrap(), vec!["save", "email"]);
    }

    #[tokio::test]
    async fn test_drain_flag_reset_after_cancelled_drain() {
        let bus = bus();
        bus.registry().register("Job", "slow", |_ctx: EventContext| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), anyhow::Error>(())
        });

        let pending = tokio::time::timeout(
            Duration::from_millis(20),
            bus.emit("Job.slow", serde_json::Value::Null),
        )
        .await;
        assert!(pending.is_err());
        assert!(!bus.is_draining());
    }
}
