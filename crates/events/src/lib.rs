//! `cardflow-events` — domain event mechanics.
//!
//! Event trait, envelopes, and the pub/sub abstraction used to feed
//! projections. No storage assumptions live here.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
