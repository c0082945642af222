//! Aggregate-side bookkeeping: the `Root` struct embedded in domain
//! types, the `Aggregate` and `StateCapture` traits, and replay helpers.

use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::EventoryError;
use crate::event::{ErasedPayload, Event};

/// Persistence bookkeeping embedded in every aggregate.
///
/// Tracks identity, the applied-event count (`current_version`), the
/// version as loaded from storage (`original_version`, the optimistic
/// concurrency expectation on save), and the not-yet-persisted changes.
///
/// Invariant: `current_version - original_version == changes.len()`
/// until a save clears the changes.
#[derive(Debug, Default)]
pub struct Root {
    aggregate_id: String,
    current_version: u64,
    original_version: u64,
    changes: Vec<Event>,
    replaying: bool,
}

impl Clone for Root {
    fn clone(&self) -> Self {
        Root {
            aggregate_id: self.aggregate_id.clone(),
            current_version: self.current_version,
            original_version: self.original_version,
            changes: self.changes.clone(),
            replaying: false,
        }
    }
}

impl Root {
    pub fn new() -> Self {
        Root::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Root {
            aggregate_id: id.into(),
            ..Root::default()
        }
    }

    pub fn id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.aggregate_id = id.into();
    }

    pub fn current_version(&self) -> u64 {
        self.current_version
    }

    pub fn original_version(&self) -> u64 {
        self.original_version
    }

    /// Events recorded since the last save.
    pub fn changes(&self) -> &[Event] {
        &self.changes
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub(crate) fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    /// Record a new change. Suppressed during replay so behavior methods
    /// can double as replay targets.
    pub fn record(&mut self, payload: Box<dyn ErasedPayload>) {
        self.record_with(payload, BTreeMap::new());
    }

    /// Record a new change carrying metadata.
    pub fn record_with(
        &mut self,
        payload: Box<dyn ErasedPayload>,
        metadata: BTreeMap<String, Value>,
    ) {
        if self.replaying {
            return;
        }
        let version = self.current_version + 1;
        let mut event = Event::new(self.aggregate_id.clone(), String::new(), version, payload);
        event.metadata = metadata;
        self.changes.push(event);
        self.current_version = version;
    }

    /// Called by repositories after a successful save: pending changes
    /// are persisted, the loaded version catches up.
    pub fn mark_saved(&mut self) {
        self.original_version = self.current_version;
        self.changes.clear();
    }

    /// Called by repositories after restoring from a snapshot or state
    /// document.
    pub fn mark_restored(&mut self, id: &str, version: u64) {
        self.aggregate_id = id.to_string();
        self.current_version = version;
        self.original_version = version;
        self.changes.clear();
    }

    fn mark_replayed(&mut self, event: &Event) {
        if self.aggregate_id.is_empty() {
            self.aggregate_id = event.aggregate_id.clone();
        }
        self.current_version = event.version;
        self.original_version = event.version;
    }
}

/// Trait for domain aggregates whose state is the fold of their history.
///
/// The aggregate owns its state-transition logic (`apply`); repositories
/// exclusively manage the persistence lifecycle through `root`.
pub trait Aggregate: Default + Send + Sync + 'static {
    const AGGREGATE_TYPE: &'static str;

    fn root(&self) -> &Root;

    fn root_mut(&mut self) -> &mut Root;

    /// Mutate state from one event. Called once per event during replay,
    /// in ascending version order.
    fn apply(&mut self, event: &Event) -> Result<(), EventoryError>;
}

/// Aggregates that can serialize their full state, for snapshots and
/// state-based persistence.
pub trait StateCapture: Aggregate {
    type State: Serialize + DeserializeOwned + Send + 'static;

    fn capture(&self) -> Self::State;

    fn restore(&mut self, state: Self::State);
}

/// Replay a batch of events onto an aggregate, updating its root
/// bookkeeping as each one lands.
///
/// The replay flag is held for the duration so `record` calls made by
/// behavior methods reused as replay targets are suppressed.
pub fn replay_events<A: Aggregate>(
    aggregate: &mut A,
    events: &[Event],
) -> Result<(), EventoryError> {
    aggregate.root_mut().set_replaying(true);
    for event in events {
        if let Err(err) = aggregate.apply(event) {
            aggregate.root_mut().set_replaying(false);
            return Err(err);
        }
        aggregate.root_mut().mark_replayed(event);
    }
    aggregate.root_mut().set_replaying(false);
    Ok(())
}

/// Implement [`Aggregate`] for a struct with an embedded [`Root`] field
/// and an apply method.
///
/// ```ignore
/// impl_aggregate!(Guild, "guild", root, apply_event);
/// ```
#[macro_export]
macro_rules! impl_aggregate {
    ($ty:ty, $kind:literal, $root:ident, $apply:ident) => {
        impl $crate::Aggregate for $ty {
            const AGGREGATE_TYPE: &'static str = $kind;

            fn root(&self) -> &$crate::Root {
                &self.$root
            }

            fn root_mut(&mut self) -> &mut $crate::Root {
                &mut self.$root
            }

            fn apply(&mut self, event: &$crate::Event) -> Result<(), $crate::EventoryError> {
                Self::$apply(self, event)
            }
        }
    };
}
