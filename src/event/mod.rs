//! Event envelope, typed payloads, and the event type registry.

mod envelope;
mod payload;
mod registry;

pub use envelope::Event;
pub use payload::{ErasedPayload, EventPayload};
pub use registry::EventTypeRegistry;
