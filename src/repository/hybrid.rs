use std::marker::PhantomData;
use std::sync::Arc;

use crate::aggregate::StateCapture;
use crate::error::EventoryError;
use crate::snapshot::SnapshotManager;
use crate::state::StateStore;
use crate::store::EventStore;

use super::event_sourced::load_from_log;
use super::state_based::{restore_from_record, state_record};
use super::{expected_version, Repository};

/// Hybrid strategy: append to the log for the audit trail, then write
/// the state document for fast reads.
///
/// Both writes run under the same expected version. The log write comes
/// first and is authoritative: if the state write then fails, the save
/// still stands, and reads self-heal by falling back to event replay
/// until the next save refreshes the document. There is deliberately no
/// cross-store transaction.
pub struct HybridRepository<S: ?Sized, T: ?Sized, A> {
    events: Arc<S>,
    states: Arc<T>,
    snapshots: Option<Arc<SnapshotManager>>,
    _marker: PhantomData<fn() -> A>,
}

impl<S: ?Sized, T: ?Sized, A> HybridRepository<S, T, A> {
    pub fn new(events: Arc<S>, states: Arc<T>) -> Self {
        HybridRepository {
            events,
            states,
            snapshots: None,
            _marker: PhantomData,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn events(&self) -> &Arc<S> {
        &self.events
    }

    pub fn states(&self) -> &Arc<T> {
        &self.states
    }
}

impl<S, T, A> Repository<A> for HybridRepository<S, T, A>
where
    S: EventStore + ?Sized,
    T: StateStore + ?Sized,
    A: StateCapture,
{
    fn save(&self, aggregate: &mut A) -> Result<(), EventoryError> {
        if !aggregate.root().has_changes() {
            return Ok(());
        }
        let expected = expected_version(aggregate.root());
        self.events.append(
            aggregate.root().id(),
            A::AGGREGATE_TYPE,
            aggregate.root().changes(),
            expected,
        )?;

        let record = state_record(aggregate)?;
        if let Err(err) = self.states.put(record, expected) {
            tracing::warn!(
                aggregate_id = aggregate.root().id(),
                error = %err,
                "state write failed after event append; log remains authoritative"
            );
        }

        let applied = aggregate.root().changes().len() as u64;
        aggregate.root_mut().mark_saved();

        if let Some(manager) = &self.snapshots {
            manager.offer(aggregate, applied);
        }
        Ok(())
    }

    fn get_by_id(&self, aggregate_id: &str) -> Result<A, EventoryError> {
        match self.states.get(aggregate_id, A::AGGREGATE_TYPE) {
            Ok(record) if !record.deleted => restore_from_record(&record),
            // Absent or soft-deleted state: the log is the source of truth.
            Ok(_) | Err(EventoryError::StateNotFound { .. }) => load_from_log(
                self.events.as_ref(),
                self.snapshots.as_deref(),
                aggregate_id,
            ),
            Err(other) => Err(other),
        }
    }

    fn get_version(&self, aggregate_id: &str) -> Result<u64, EventoryError> {
        let version = self.states.version(aggregate_id, A::AGGREGATE_TYPE)?;
        if version > 0 {
            return Ok(version);
        }
        self.events.last_version(aggregate_id, A::AGGREGATE_TYPE)
    }

    fn exists(&self, aggregate_id: &str) -> Result<bool, EventoryError> {
        if self.states.exists(aggregate_id, A::AGGREGATE_TYPE)? {
            return Ok(true);
        }
        Ok(self.events.last_version(aggregate_id, A::AGGREGATE_TYPE)? > 0)
    }
}
