use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventoryError;

/// A stored snapshot: serialized aggregate state at a specific version,
/// keyed by `(aggregate_id, aggregate_type)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub state: Value,
}

/// Snapshot persistence. The newest snapshot per aggregate is the one
/// used for restore; older generations are retained for audit until
/// pruned by [`SnapshotStore::delete_oldest`].
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot. An existing snapshot at the same version is
    /// replaced; other generations are kept.
    fn save(&self, record: SnapshotRecord) -> Result<(), EventoryError>;

    /// Load the newest snapshot, or fail with
    /// [`EventoryError::SnapshotNotFound`].
    fn load_latest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<SnapshotRecord, EventoryError>;

    fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError>;

    /// Remove the oldest generations, keeping the newest `keep`.
    /// Returns the number removed.
    fn delete_oldest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        keep: usize,
    ) -> Result<u64, EventoryError>;
}
