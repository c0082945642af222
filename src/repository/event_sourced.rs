use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use crate::aggregate::{replay_events, StateCapture};
use crate::codec::decode_state;
use crate::error::EventoryError;
use crate::snapshot::SnapshotManager;
use crate::store::EventStore;

use super::{expected_version, not_found, Repository};

/// Event-sourced strategy: the log is the state.
///
/// `save` appends the aggregate's pending changes under its
/// expected-version guard; `get_by_id` restores from the newest snapshot
/// when one exists and replays only the events after it.
pub struct EventSourcedRepository<S: ?Sized, A> {
    store: Arc<S>,
    snapshots: Option<Arc<SnapshotManager>>,
    _marker: PhantomData<fn() -> A>,
}

impl<S: ?Sized, A> EventSourcedRepository<S, A> {
    pub fn new(store: Arc<S>) -> Self {
        EventSourcedRepository {
            store,
            snapshots: None,
            _marker: PhantomData,
        }
    }

    /// Attach a snapshot manager; `save` will offer every commit to it.
    pub fn with_snapshots(mut self, snapshots: Arc<SnapshotManager>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

/// Restore an aggregate from snapshot-plus-log. Shared with the hybrid
/// strategy's fallback read path.
pub(crate) fn load_from_log<S, A>(
    store: &S,
    snapshots: Option<&SnapshotManager>,
    aggregate_id: &str,
) -> Result<A, EventoryError>
where
    S: EventStore + ?Sized,
    A: StateCapture,
{
    let started = Instant::now();
    let mut aggregate = A::default();
    let mut restore_version = 0;

    if let Some(manager) = snapshots {
        match manager.load_latest(aggregate_id, A::AGGREGATE_TYPE) {
            Ok(snapshot) => {
                let state = decode_state(&snapshot.state)?;
                aggregate.restore(state);
                aggregate
                    .root_mut()
                    .mark_restored(aggregate_id, snapshot.version);
                restore_version = snapshot.version;
            }
            Err(EventoryError::SnapshotNotFound { .. }) => {}
            Err(other) => return Err(other),
        }
    }

    let events = store.load(
        aggregate_id,
        A::AGGREGATE_TYPE,
        restore_version + 1,
        0,
    )?;
    if restore_version == 0 && events.is_empty() {
        return Err(not_found::<A>(aggregate_id));
    }

    let replayed = events.len();
    replay_events(&mut aggregate, &events)?;

    if let Some(manager) = snapshots {
        manager.record_restore(aggregate_id, started.elapsed());
    }
    tracing::trace!(
        aggregate_id,
        aggregate_type = A::AGGREGATE_TYPE,
        restore_version,
        replayed,
        "aggregate rehydrated from log"
    );
    Ok(aggregate)
}

impl<S, A> Repository<A> for EventSourcedRepository<S, A>
where
    S: EventStore + ?Sized,
    A: StateCapture,
{
    fn save(&self, aggregate: &mut A) -> Result<(), EventoryError> {
        if !aggregate.root().has_changes() {
            return Ok(());
        }
        let expected = expected_version(aggregate.root());
        self.store.append(
            aggregate.root().id(),
            A::AGGREGATE_TYPE,
            aggregate.root().changes(),
            expected,
        )?;

        let applied = aggregate.root().changes().len() as u64;
        aggregate.root_mut().mark_saved();

        if let Some(manager) = &self.snapshots {
            manager.offer(aggregate, applied);
        }
        Ok(())
    }

    fn get_by_id(&self, aggregate_id: &str) -> Result<A, EventoryError> {
        load_from_log(
            self.store.as_ref(),
            self.snapshots.as_deref(),
            aggregate_id,
        )
    }

    fn get_version(&self, aggregate_id: &str) -> Result<u64, EventoryError> {
        let version = self.store.last_version(aggregate_id, A::AGGREGATE_TYPE)?;
        if version > 0 {
            return Ok(version);
        }
        // Fully compacted logs still have a covering snapshot.
        if let Some(manager) = &self.snapshots {
            match manager.load_latest(aggregate_id, A::AGGREGATE_TYPE) {
                Ok(snapshot) => return Ok(snapshot.version),
                Err(EventoryError::SnapshotNotFound { .. }) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(0)
    }

    fn exists(&self, aggregate_id: &str) -> Result<bool, EventoryError> {
        if self.store.last_version(aggregate_id, A::AGGREGATE_TYPE)? > 0 {
            return Ok(true);
        }
        match &self.snapshots {
            Some(manager) => manager.exists(aggregate_id, A::AGGREGATE_TYPE),
            None => Ok(false),
        }
    }
}
