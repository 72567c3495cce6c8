//! Event handler registry.
//!
//! An explicit object owned by whoever composes the bus. Tests get a clean
//! slate with `EventRegistry::new()` or `clear()`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use flowcore_graph::{execution_levels, SortNode};

use crate::event::EventContext;

/// Reacts to one `Noun.verb` pair.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: EventContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext) -> anyhow::Result<()> {
        (self)(ctx).await
    }
}

/// Ordering among handlers of the same event: this handler is called `name`
/// and runs only after the handlers listed in `after` have finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerDependencies {
    pub name: String,
    pub after: Vec<String>,
}

impl HandlerDependencies {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            after: Vec::new(),
        }
    }

    pub fn after(mut self, handler: &str) -> Self {
        self.after.push(handler.to_string());
        self
    }
}

pub type HandlerId = u64;

/// One registered handler.
#[derive(Clone)]
pub struct Registration {
    pub id: HandlerId,
    pub noun: String,
    pub verb: String,
    pub dependencies: Option<HandlerDependencies>,
    pub(crate) handler: Arc<dyn EventHandler>,
}

impl Registration {
    /// Name used in logs and reports: the dependency name, or `#<id>`.
    pub fn label(&self) -> String {
        match &self.dependencies {
            Some(deps) if !deps.name.is_empty() => deps.name.clone(),
            _ => format!("#{}", self.id),
        }
    }

    pub fn matches(&self, noun: &str, verb: &str) -> bool {
        self.noun == noun && self.verb == verb
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("event", &format!("{}.{}", self.noun, self.verb))
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[derive(Default)]
pub struct EventRegistry {
    entries: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, noun: &str, verb: &str, handler: impl EventHandler + 'static) -> HandlerId {
        self.insert(noun, verb, Arc::new(handler), None)
    }

    pub fn register_with(
        &self,
        noun: &str,
        verb: &str,
        handler: impl EventHandler + 'static,
        dependencies: HandlerDependencies,
    ) -> HandlerId {
        self.insert(noun, verb, Arc::new(handler), Some(dependencies))
    }

    fn insert(
        &self,
        noun: &str,
        verb: &str,
        handler: Arc<dyn EventHandler>,
        dependencies: Option<HandlerDependencies>,
    ) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("📝 Registered handler #{} for {}.{}", id, noun, verb);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                noun: noun.to_string(),
                verb: verb.to_string(),
                dependencies,
                handler,
            });
        id
    }

    /// Remove one handler. Returns whether it existed.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    /// Every registration, in registration order.
    pub fn get_all(&self) -> Vec<Registration> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn matching(&self, noun: &str, verb: &str) -> Vec<Registration> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.matches(noun, verb))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Split the handlers of one event into groups that run one after another.
///
/// Handlers within a group run concurrently. Without any dependency
/// declarations everything lands in a single group. Unknown names,
/// duplicate names or cycles fall back to a single group.
pub(crate) fn delivery_groups(handlers: Vec<Registration>) -> Vec<Vec<Registration>> {
    if handlers.iter().all(|h| h.dependencies.as_ref().is_none_or(|d| d.after.is_empty())) {
        return vec![handlers];
    }

    let nodes: Vec<SortNode> = handlers
        .iter()
        .map(|h| {
            let after = h.dependencies.as_ref().map(|d| d.after.clone()).unwrap_or_default();
            SortNode::new(&h.label(), after)
        })
        .collect();

    match execution_levels(&nodes) {
        Ok(levels) => {
            let mut slots: Vec<Option<Registration>> = handlers.into_iter().map(Some).collect();
            levels
                .iter()
                .map(|level| {
                    level
                        .iter()
                        .filter_map(|label| {
                            let position = nodes.iter().position(|n| &n.id == label)?;
                            slots[position].take()
                        })
                        .collect()
                })
                .collect()
        }
        Err(e) => {
            tracing::warn!("⚠️ Ignoring handler ordering ({e}), running all handlers together");
            vec![handlers]
        }
    }
}
