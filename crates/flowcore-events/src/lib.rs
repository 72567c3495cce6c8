//! # FlowCore Events
//!
//! Named events (`Noun.verb`) routed to registered handlers.
//!
//! - [`EventRegistry`] — explicit registration list (`register`, `get_all`,
//!   `clear`), shared by reference with the bus.
//! - [`EventBus`] — FIFO queue with a single drain loop. Deliveries are
//!   strictly serialized; the handlers of one delivery run concurrently and
//!   a failing handler never stops its siblings or the drain.

pub mod bus;
pub mod event;
pub mod registry;

pub use bus::{DeliveryReport, EventBus, HandlerFailure};
pub use event::{Event, EventContext, EventName};
pub use registry::{EventHandler, EventRegistry, HandlerDependencies, HandlerId, Registration};
