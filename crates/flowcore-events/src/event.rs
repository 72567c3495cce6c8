//! Event names and the envelope handed to handlers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::EventBus;

/// A parsed `Noun.verb` event name, e.g. `Customer.created`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventName {
    pub noun: String,
    pub verb: String,
}

impl EventName {
    /// Split `Noun.verb` at its single dot. Both halves must be non-empty and
    /// free of whitespace; anything else is rejected.
    pub fn parse(event: &str) -> Option<Self> {
        let (noun, verb) = event.split_once('.')?;
        let valid = |part: &str| !part.is_empty() && !part.contains('.') && !part.contains(char::is_whitespace);
        if !valid(noun) || !valid(verb) {
            return None;
        }
        Some(Self {
            noun: noun.to_string(),
            verb: verb.to_string(),
        })
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.noun, self.verb)
    }
}

/// One delivered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: EventName,
    /// Freeform payload.
    pub data: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

/// What a handler receives besides the payload.
#[derive(Clone)]
pub struct EventContext {
    pub event: Arc<Event>,
    bus: EventBus,
}

impl EventContext {
    pub(crate) fn new(event: Arc<Event>, bus: EventBus) -> Self {
        Self { event, bus }
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.event.data
    }

    /// Queue a follow-up event. It is delivered once the current delivery
    /// is over, never recursively.
    pub async fn emit(&self, event: &str, data: serde_json::Value) {
        self.bus.emit(event, data).await;
    }

    /// A bus handle whose `emit` and `deliver` only queue.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event.name.to_string())
            .finish()
    }
}
