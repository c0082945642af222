//! Eventory — an event-sourcing persistence engine.
//!
//! Aggregates store their history as an append-only, per-aggregate event
//! log with optimistic concurrency, rebuild state by replaying that log
//! (optionally from a snapshot), and can alternatively persist their
//! full state directly — or both at once — behind one repository
//! contract.
//!
//! The storage backends themselves are external collaborators: the crate
//! ships capability traits for an ordered-list store and a transactional
//! document store, in-memory implementations of each, and the adapters
//! that bind them to the engine through a serialization codec and a
//! runtime event type registry.

pub mod aggregate;
pub mod codec;
mod error;
pub mod event;
pub mod repository;
pub mod snapshot;
pub mod state;
pub mod store;

pub use aggregate::{replay_events, Aggregate, Root, StateCapture};
pub use codec::EventCodec;
pub use error::EventoryError;
pub use event::{ErasedPayload, Event, EventPayload, EventTypeRegistry};
pub use repository::{
    EventSourcedRepository, HybridRepository, Repository, StateBasedRepository,
};
pub use snapshot::{
    AdaptivePolicy, CompositePolicy, DocSnapshotStore, EveryNEvents, ListSnapshotStore,
    SnapshotManager, SnapshotPolicy, SnapshotRecord, SnapshotStore, TimeInterval,
    VersionInterval,
};
pub use state::{DocStateStore, ListStateStore, StateRecord, StateStore};
pub use store::{
    DocClient, DocEventStore, EventStore, InMemoryDocClient, InMemoryListClient, ListClient,
    ListEventStore,
};
