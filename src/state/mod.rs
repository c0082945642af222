//! State-based persistence: the full-document aggregate record with a
//! version-checked conditional write, used by the state-based and hybrid
//! repositories.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::canonicalize_document;
use crate::error::EventoryError;
use crate::store::document::RawDocument;
use crate::store::{CasOutcome, DocClient, DocQuery, ListClient, TxOutcome};

/// The stored state document for one aggregate.
///
/// Soft-deleted records stay on disk with `deleted == true`; readers
/// treat them as absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub data: Value,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl StateRecord {
    /// Build a record for a fresh write; the store fills in the
    /// timestamps on persist.
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        data: Value,
        version: u64,
    ) -> Self {
        let now = Utc::now();
        StateRecord {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            data,
            version,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }
}

/// Versioned full-state storage, unique per
/// `(aggregate_id, aggregate_type)`.
pub trait StateStore: Send + Sync {
    /// Write the record iff the stored version equals `expected_version`
    /// (0 for a record expected to be absent). The check-and-write is
    /// the backend's single conditional operation.
    fn put(&self, record: StateRecord, expected_version: u64) -> Result<(), EventoryError>;

    /// Read the record (soft-deleted included; callers check the flag),
    /// or fail with [`EventoryError::StateNotFound`].
    fn get(&self, aggregate_id: &str, aggregate_type: &str)
        -> Result<StateRecord, EventoryError>;

    /// Stored version; 0 when absent or soft-deleted.
    fn version(&self, aggregate_id: &str, aggregate_type: &str) -> Result<u64, EventoryError>;

    /// Present and not soft-deleted.
    fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError>;

    /// Soft-delete the record, keeping it on disk.
    fn mark_deleted(&self, aggregate_id: &str, aggregate_type: &str)
        -> Result<(), EventoryError>;
}

fn conflict(aggregate_id: &str, expected: u64, actual: u64) -> EventoryError {
    EventoryError::ConcurrencyConflict {
        aggregate_id: aggregate_id.to_string(),
        expected,
        actual,
    }
}

fn not_found(aggregate_id: &str, aggregate_type: &str) -> EventoryError {
    EventoryError::StateNotFound {
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: aggregate_type.to_string(),
    }
}

/// State store over the list backend's versioned value slots.
#[derive(Clone)]
pub struct ListStateStore<C> {
    client: Arc<C>,
}

impl<C: ListClient> ListStateStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        ListStateStore { client }
    }

    fn key(aggregate_type: &str, aggregate_id: &str) -> String {
        format!("state:{}:{}", aggregate_type, aggregate_id)
    }

    fn read(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<Option<StateRecord>, EventoryError> {
        let key = Self::key(aggregate_type, aggregate_id);
        match self.client.kv_get(&key)? {
            Some(raw) => {
                let record = serde_json::from_str(&raw).map_err(EventoryError::serde)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl<C: ListClient> StateStore for ListStateStore<C> {
    fn put(&self, mut record: StateRecord, expected_version: u64) -> Result<(), EventoryError> {
        record.updated_at = Utc::now();
        if let Some(existing) = self.read(&record.aggregate_id, &record.aggregate_type)? {
            record.created_at = existing.created_at;
        }

        let key = Self::key(&record.aggregate_type, &record.aggregate_id);
        let value = serde_json::to_string(&record).map_err(EventoryError::serde)?;
        match self
            .client
            .kv_put_versioned(&key, expected_version, record.version, value)?
        {
            CasOutcome::Applied { .. } => Ok(()),
            CasOutcome::VersionMismatch { actual } => {
                Err(conflict(&record.aggregate_id, expected_version, actual))
            }
        }
    }

    fn get(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<StateRecord, EventoryError> {
        self.read(aggregate_id, aggregate_type)?
            .ok_or_else(|| not_found(aggregate_id, aggregate_type))
    }

    fn version(&self, aggregate_id: &str, aggregate_type: &str) -> Result<u64, EventoryError> {
        Ok(self
            .read(aggregate_id, aggregate_type)?
            .filter(|record| !record.deleted)
            .map(|record| record.version)
            .unwrap_or(0))
    }

    fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError> {
        Ok(self
            .read(aggregate_id, aggregate_type)?
            .is_some_and(|record| !record.deleted))
    }

    fn mark_deleted(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<(), EventoryError> {
        let mut record = self.get(aggregate_id, aggregate_type)?;
        let version = record.version;
        record.deleted = true;
        record.updated_at = Utc::now();

        let key = Self::key(aggregate_type, aggregate_id);
        let value = serde_json::to_string(&record).map_err(EventoryError::serde)?;
        match self.client.kv_put_versioned(&key, version, version, value)? {
            CasOutcome::Applied { .. } => Ok(()),
            CasOutcome::VersionMismatch { actual } => {
                Err(conflict(aggregate_id, version, actual))
            }
        }
    }
}

const STATES: &str = "states";

/// State store over the document backend.
#[derive(Clone)]
pub struct DocStateStore<C> {
    client: Arc<C>,
}

impl<C: DocClient> DocStateStore<C> {
    pub fn new(client: Arc<C>) -> Result<Self, EventoryError> {
        client.ensure_unique_index(STATES, &["aggregate_id", "aggregate_type"])?;
        Ok(DocStateStore { client })
    }

    fn guard(aggregate_id: &str, aggregate_type: &str) -> Vec<(String, String)> {
        vec![
            ("aggregate_id".to_string(), aggregate_id.to_string()),
            ("aggregate_type".to_string(), aggregate_type.to_string()),
        ]
    }

    fn read(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<Option<StateRecord>, EventoryError> {
        let query = DocQuery::new()
            .eq("aggregate_id", aggregate_id)
            .eq("aggregate_type", aggregate_type);
        match self.client.find_one(STATES, &query)? {
            Some(doc) => {
                let canonical = canonicalize_document(&doc);
                let record = serde_json::from_value(canonical).map_err(EventoryError::serde)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn write_guarded(
        &self,
        record: &StateRecord,
        expected_version: u64,
    ) -> Result<(), EventoryError> {
        let value = serde_json::to_value(record).map_err(EventoryError::serde)?;
        let doc = RawDocument::from_value(&value);
        let outcome = self.client.replace_guarded(
            STATES,
            &Self::guard(&record.aggregate_id, &record.aggregate_type),
            "version",
            expected_version,
            doc,
        )?;
        match outcome {
            TxOutcome::Committed => Ok(()),
            TxOutcome::PreconditionFailed { actual } => {
                Err(conflict(&record.aggregate_id, expected_version, actual))
            }
        }
    }
}

impl<C: DocClient> StateStore for DocStateStore<C> {
    fn put(&self, mut record: StateRecord, expected_version: u64) -> Result<(), EventoryError> {
        record.updated_at = Utc::now();
        if let Some(existing) = self.read(&record.aggregate_id, &record.aggregate_type)? {
            record.created_at = existing.created_at;
        }
        self.write_guarded(&record, expected_version)
    }

    fn get(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<StateRecord, EventoryError> {
        self.read(aggregate_id, aggregate_type)?
            .ok_or_else(|| not_found(aggregate_id, aggregate_type))
    }

    fn version(&self, aggregate_id: &str, aggregate_type: &str) -> Result<u64, EventoryError> {
        Ok(self
            .read(aggregate_id, aggregate_type)?
            .filter(|record| !record.deleted)
            .map(|record| record.version)
            .unwrap_or(0))
    }

    fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError> {
        Ok(self
            .read(aggregate_id, aggregate_type)?
            .is_some_and(|record| !record.deleted))
    }

    fn mark_deleted(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<(), EventoryError> {
        let mut record = self.get(aggregate_id, aggregate_type)?;
        let version = record.version;
        record.deleted = true;
        record.updated_at = Utc::now();
        self.write_guarded(&record, version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryDocClient, InMemoryListClient};
    use serde_json::json;

    fn record(version: u64) -> StateRecord {
        StateRecord::new("guild-1", "guild", json!({ "members": version }), version)
    }

    fn list_store() -> ListStateStore<InMemoryListClient> {
        ListStateStore::new(Arc::new(InMemoryListClient::new()))
    }

    fn doc_store() -> DocStateStore<InMemoryDocClient> {
        DocStateStore::new(Arc::new(InMemoryDocClient::new())).unwrap()
    }

    fn exercise_put_get(store: &dyn StateStore) {
        store.put(record(2), 0).unwrap();
        let loaded = store.get("guild-1", "guild").unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.data, json!({ "members": 2 }));
        assert!(!loaded.deleted);
        assert_eq!(store.version("guild-1", "guild").unwrap(), 2);
        assert!(store.exists("guild-1", "guild").unwrap());
    }

    fn exercise_conflict(store: &dyn StateStore) {
        store.put(record(2), 0).unwrap();
        let err = store.put(record(3), 1).unwrap_err();
        assert_eq!(
            err,
            EventoryError::ConcurrencyConflict {
                aggregate_id: "guild-1".into(),
                expected: 1,
                actual: 2,
            }
        );
        // Winning writer with the right expectation succeeds.
        store.put(record(3), 2).unwrap();
        assert_eq!(store.version("guild-1", "guild").unwrap(), 3);
    }

    fn exercise_soft_delete(store: &dyn StateStore) {
        store.put(record(2), 0).unwrap();
        store.mark_deleted("guild-1", "guild").unwrap();

        // Record survives on disk but reads as absent.
        assert!(store.get("guild-1", "guild").unwrap().deleted);
        assert!(!store.exists("guild-1", "guild").unwrap());
        assert_eq!(store.version("guild-1", "guild").unwrap(), 0);
    }

    #[test]
    fn list_put_get() {
        exercise_put_get(&list_store());
    }

    #[test]
    fn list_conflict() {
        exercise_conflict(&list_store());
    }

    #[test]
    fn list_soft_delete() {
        exercise_soft_delete(&list_store());
    }

    #[test]
    fn list_get_missing_fails() {
        let err = list_store().get("ghost", "guild").unwrap_err();
        assert!(matches!(err, EventoryError::StateNotFound { .. }));
    }

    #[test]
    fn doc_put_get() {
        exercise_put_get(&doc_store());
    }

    #[test]
    fn doc_conflict() {
        exercise_conflict(&doc_store());
    }

    #[test]
    fn doc_soft_delete() {
        exercise_soft_delete(&doc_store());
    }

    #[test]
    fn doc_created_at_survives_updates() {
        let store = doc_store();
        store.put(record(1), 0).unwrap();
        let first = store.get("guild-1", "guild").unwrap();
        store.put(record(2), 1).unwrap();
        let second = store.get("guild-1", "guild").unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }
}
