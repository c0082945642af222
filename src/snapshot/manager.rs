use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::aggregate::StateCapture;
use crate::codec::encode_state;
use crate::error::EventoryError;

use super::policy::SnapshotPolicy;
use super::store::{SnapshotRecord, SnapshotStore};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives snapshot creation: asks the policy, serializes the state, and
/// hands the write to a background thread.
///
/// The write path never waits on a snapshot. Creation failures and
/// timeouts are logged and swallowed; the triggering save has already
/// committed and stays committed. Retention pruning is best-effort.
pub struct SnapshotManager {
    store: Arc<dyn SnapshotStore>,
    policy: Arc<dyn SnapshotPolicy>,
    keep_generations: usize,
    write_timeout: Duration,
}

impl SnapshotManager {
    pub fn new(store: Arc<dyn SnapshotStore>, policy: Arc<dyn SnapshotPolicy>) -> Self {
        SnapshotManager {
            store,
            policy,
            keep_generations: 1,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Retain this many newest generations when pruning.
    pub fn with_retention(mut self, keep_generations: usize) -> Self {
        self.keep_generations = keep_generations.max(1);
        self
    }

    /// Deadline for one background snapshot write.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Feed an observed restore latency to the policy.
    pub fn record_restore(&self, aggregate_id: &str, elapsed: Duration) {
        self.policy.record_restore(aggregate_id, elapsed);
    }

    pub fn load_latest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<SnapshotRecord, EventoryError> {
        self.store.load_latest(aggregate_id, aggregate_type)
    }

    pub fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError> {
        self.store.exists(aggregate_id, aggregate_type)
    }

    /// Offer a snapshot opportunity after a successful save.
    ///
    /// Serialization happens on the calling thread (the aggregate cannot
    /// cross into the worker); the storage write is dispatched
    /// fire-and-forget with its own deadline.
    pub fn offer<A: StateCapture>(&self, aggregate: &A, events_applied: u64) {
        if !self
            .policy
            .should_snapshot(aggregate.root(), events_applied)
        {
            return;
        }
        match self.build_record(aggregate) {
            Ok(record) => self.dispatch(record),
            Err(err) => {
                tracing::warn!(
                    aggregate_id = aggregate.root().id(),
                    error = %err,
                    "snapshot state serialization failed"
                );
            }
        }
    }

    /// Synchronous snapshot, bypassing the policy. Useful for tests and
    /// for callers that want a snapshot before compaction.
    pub fn snapshot_now<A: StateCapture>(&self, aggregate: &A) -> Result<(), EventoryError> {
        let record = self.build_record(aggregate)?;
        let aggregate_id = record.aggregate_id.clone();
        let aggregate_type = record.aggregate_type.clone();
        self.store.save(record)?;
        self.prune(&aggregate_id, &aggregate_type);
        Ok(())
    }

    fn prune(&self, aggregate_id: &str, aggregate_type: &str) {
        if let Err(err) =
            self.store
                .delete_oldest(aggregate_id, aggregate_type, self.keep_generations)
        {
            tracing::warn!(
                %aggregate_id,
                error = %err,
                "snapshot retention pruning failed"
            );
        }
    }

    fn build_record<A: StateCapture>(
        &self,
        aggregate: &A,
    ) -> Result<SnapshotRecord, EventoryError> {
        let state = encode_state(&aggregate.capture())?;
        Ok(SnapshotRecord {
            aggregate_id: aggregate.root().id().to_string(),
            aggregate_type: A::AGGREGATE_TYPE.to_string(),
            version: aggregate.root().current_version(),
            timestamp: Utc::now(),
            state,
        })
    }

    fn dispatch(&self, record: SnapshotRecord) {
        let store = Arc::clone(&self.store);
        let keep = self.keep_generations;
        let timeout = self.write_timeout;

        thread::spawn(move || {
            let aggregate_id = record.aggregate_id.clone();
            let aggregate_type = record.aggregate_type.clone();
            let version = record.version;

            let (done_tx, done_rx) = mpsc::channel();
            let writer_store = Arc::clone(&store);
            thread::spawn(move || {
                let _ = done_tx.send(writer_store.save(record));
            });

            match done_rx.recv_timeout(timeout) {
                Ok(Ok(())) => {
                    tracing::debug!(%aggregate_id, %aggregate_type, version, "snapshot stored");
                    if let Err(err) = store.delete_oldest(&aggregate_id, &aggregate_type, keep) {
                        tracing::warn!(
                            %aggregate_id,
                            error = %err,
                            "snapshot retention pruning failed"
                        );
                    }
                }
                Ok(Err(err)) => {
                    tracing::warn!(%aggregate_id, version, error = %err, "snapshot write failed");
                }
                Err(_) => {
                    tracing::warn!(%aggregate_id, version, "snapshot write timed out");
                }
            }
        });
    }
}
