//! Infrastructure layer: event store, command dispatch, projections, and the
//! engine services that expose the public operations.

pub mod command_dispatcher;
pub mod engine;
pub mod event_store;
pub mod projections;
pub mod read_model;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError, load_aggregate};
pub use engine::{ArrivalOwnership, ArrivalSpec, ArrivedCard, ConsignorDirectory, Engine,
    PayoutOpened, SettlementOutcome, SkippedMember};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent,
    UncommittedEvent};
