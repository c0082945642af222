//! The repository façade: one contract, three persistence strategies.

mod event_sourced;
mod hybrid;
mod state_based;

pub use event_sourced::EventSourcedRepository;
pub use hybrid::HybridRepository;
pub use state_based::StateBasedRepository;

use crate::aggregate::{Aggregate, Root};
use crate::error::EventoryError;

/// Persistence façade used by application code.
///
/// From the caller's perspective an aggregate moves through
/// `New → save → Persisted → get_by_id → Rehydrated → mutate → Dirty →
/// save → Persisted → ...`; two concurrent savers for the same aggregate
/// race at the storage backend, exactly one wins, and the loser sees
/// [`EventoryError::ConcurrencyConflict`].
pub trait Repository<A: Aggregate>: Send + Sync {
    /// Persist the aggregate's pending changes. All-or-nothing: either
    /// the whole batch commits or nothing does.
    fn save(&self, aggregate: &mut A) -> Result<(), EventoryError>;

    /// Rehydrate the aggregate, or fail with
    /// [`EventoryError::AggregateNotFound`].
    fn get_by_id(&self, aggregate_id: &str) -> Result<A, EventoryError>;

    /// The persisted version; 0 when the aggregate does not exist yet.
    fn get_version(&self, aggregate_id: &str) -> Result<u64, EventoryError>;

    fn exists(&self, aggregate_id: &str) -> Result<bool, EventoryError>;
}

/// The expected-version rule shared by all three strategies.
///
/// A brand-new aggregate (never loaded, `original_version == 0`) expects
/// no prior record; a loaded aggregate expects its recorded original
/// version; an aggregate with neither signal falls through to the same
/// no-prior-record default. All three cases collapse onto
/// `original_version`, which is 0 exactly when the aggregate was never
/// loaded.
pub(crate) fn expected_version(root: &Root) -> u64 {
    root.original_version()
}

pub(crate) fn not_found<A: Aggregate>(aggregate_id: &str) -> EventoryError {
    EventoryError::AggregateNotFound {
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: A::AGGREGATE_TYPE.to_string(),
    }
}
