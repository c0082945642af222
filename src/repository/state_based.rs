use std::marker::PhantomData;
use std::sync::Arc;

use crate::aggregate::StateCapture;
use crate::codec::{decode_state, encode_state};
use crate::error::EventoryError;
use crate::state::{StateRecord, StateStore};

use super::{expected_version, not_found, Repository};

/// State-based strategy: store the current state directly, no replay.
///
/// Writes go through the same expected-version guard as the event log,
/// implemented as the backend's conditional update on the stored version
/// field.
pub struct StateBasedRepository<T: ?Sized, A> {
    states: Arc<T>,
    _marker: PhantomData<fn() -> A>,
}

impl<T: ?Sized, A> StateBasedRepository<T, A> {
    pub fn new(states: Arc<T>) -> Self {
        StateBasedRepository {
            states,
            _marker: PhantomData,
        }
    }

    pub fn states(&self) -> &Arc<T> {
        &self.states
    }
}

/// Build the state document for an aggregate's current state.
pub(crate) fn state_record<A: StateCapture>(aggregate: &A) -> Result<StateRecord, EventoryError> {
    let data = encode_state(&aggregate.capture())?;
    Ok(StateRecord::new(
        aggregate.root().id(),
        A::AGGREGATE_TYPE,
        data,
        aggregate.root().current_version(),
    ))
}

/// Rehydrate an aggregate from a state record.
pub(crate) fn restore_from_record<A: StateCapture>(
    record: &StateRecord,
) -> Result<A, EventoryError> {
    let mut aggregate = A::default();
    let state = decode_state(&record.data)?;
    aggregate.restore(state);
    aggregate
        .root_mut()
        .mark_restored(&record.aggregate_id, record.version);
    Ok(aggregate)
}

impl<T, A> Repository<A> for StateBasedRepository<T, A>
where
    T: StateStore + ?Sized,
    A: StateCapture,
{
    fn save(&self, aggregate: &mut A) -> Result<(), EventoryError> {
        if !aggregate.root().has_changes() {
            return Ok(());
        }
        if aggregate.root().id().trim().is_empty() {
            return Err(EventoryError::Validation(
                "aggregate id must not be blank".into(),
            ));
        }
        let expected = expected_version(aggregate.root());
        let record = state_record(aggregate)?;
        self.states.put(record, expected)?;
        aggregate.root_mut().mark_saved();
        Ok(())
    }

    fn get_by_id(&self, aggregate_id: &str) -> Result<A, EventoryError> {
        match self.states.get(aggregate_id, A::AGGREGATE_TYPE) {
            Ok(record) if !record.deleted => restore_from_record(&record),
            Ok(_) => Err(not_found::<A>(aggregate_id)),
            Err(EventoryError::StateNotFound { .. }) => Err(not_found::<A>(aggregate_id)),
            Err(other) => Err(other),
        }
    }

    fn get_version(&self, aggregate_id: &str) -> Result<u64, EventoryError> {
        self.states.version(aggregate_id, A::AGGREGATE_TYPE)
    }

    fn exists(&self, aggregate_id: &str) -> Result<bool, EventoryError> {
        self.states.exists(aggregate_id, A::AGGREGATE_TYPE)
    }
}
