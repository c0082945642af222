use std::sync::Arc;

use crate::codec::canonicalize_document;
use crate::error::EventoryError;
use crate::store::document::RawDocument;
use crate::store::{DocClient, DocQuery, ListClient, SortOrder};

use super::store::{SnapshotRecord, SnapshotStore};

/// Snapshot store over the list backend: one generation list per
/// aggregate, newest at the tail.
#[derive(Clone)]
pub struct ListSnapshotStore<C> {
    client: Arc<C>,
}

impl<C: ListClient> ListSnapshotStore<C> {
    pub fn new(client: Arc<C>) -> Self {
        ListSnapshotStore { client }
    }

    fn key(aggregate_type: &str, aggregate_id: &str) -> String {
        format!("snapshots:{}:{}", aggregate_type, aggregate_id)
    }
}

impl<C: ListClient> SnapshotStore for ListSnapshotStore<C> {
    fn save(&self, record: SnapshotRecord) -> Result<(), EventoryError> {
        let key = Self::key(&record.aggregate_type, &record.aggregate_id);
        let entry = serde_json::to_string(&record).map_err(EventoryError::serde)?;
        self.client.push(&key, vec![entry])?;
        Ok(())
    }

    fn load_latest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<SnapshotRecord, EventoryError> {
        let key = Self::key(aggregate_type, aggregate_id);
        let info = self.client.info(&key)?;
        if info.len == 0 {
            return Err(EventoryError::SnapshotNotFound {
                aggregate_id: aggregate_id.to_string(),
                aggregate_type: aggregate_type.to_string(),
            });
        }
        let entries = self.client.range(&key, info.len - 1, 1)?;
        let entry = entries.first().ok_or_else(|| EventoryError::SnapshotNotFound {
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: aggregate_type.to_string(),
        })?;
        serde_json::from_str(entry).map_err(EventoryError::serde)
    }

    fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError> {
        let key = Self::key(aggregate_type, aggregate_id);
        Ok(self.client.info(&key)?.len > 0)
    }

    fn delete_oldest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        keep: usize,
    ) -> Result<u64, EventoryError> {
        let key = Self::key(aggregate_type, aggregate_id);
        let info = self.client.info(&key)?;
        let excess = info.len.saturating_sub(keep as u64);
        if excess == 0 {
            return Ok(0);
        }
        self.client.trim_front(&key, excess)
    }
}

const SNAPSHOTS: &str = "snapshots";

/// Snapshot store over the document backend: one document per
/// generation, unique per `(aggregate_id, aggregate_type, version)`.
#[derive(Clone)]
pub struct DocSnapshotStore<C> {
    client: Arc<C>,
}

impl<C: DocClient> DocSnapshotStore<C> {
    pub fn new(client: Arc<C>) -> Result<Self, EventoryError> {
        client.ensure_unique_index(
            SNAPSHOTS,
            &["aggregate_id", "aggregate_type", "version"],
        )?;
        Ok(DocSnapshotStore { client })
    }

    fn base_query(aggregate_id: &str, aggregate_type: &str) -> DocQuery {
        DocQuery::new()
            .eq("aggregate_id", aggregate_id)
            .eq("aggregate_type", aggregate_type)
    }

    fn decode(doc: &RawDocument) -> Result<SnapshotRecord, EventoryError> {
        let canonical = canonicalize_document(doc);
        serde_json::from_value(canonical).map_err(EventoryError::serde)
    }
}

impl<C: DocClient> SnapshotStore for DocSnapshotStore<C> {
    fn save(&self, record: SnapshotRecord) -> Result<(), EventoryError> {
        let value = serde_json::to_value(&record).map_err(EventoryError::serde)?;
        let doc = RawDocument::from_value(&value);

        // Replace an existing generation at the same version, keep the rest.
        let same_version = Self::base_query(&record.aggregate_id, &record.aggregate_type)
            .range("version", record.version, record.version);
        self.client.delete_many(SNAPSHOTS, &same_version)?;
        self.client.insert_one(SNAPSHOTS, doc)
    }

    fn load_latest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<SnapshotRecord, EventoryError> {
        let query = Self::base_query(aggregate_id, aggregate_type)
            .sort("version", SortOrder::Desc)
            .limit(1);
        match self.client.find_one(SNAPSHOTS, &query)? {
            Some(doc) => Self::decode(&doc),
            None => Err(EventoryError::SnapshotNotFound {
                aggregate_id: aggregate_id.to_string(),
                aggregate_type: aggregate_type.to_string(),
            }),
        }
    }

    fn exists(&self, aggregate_id: &str, aggregate_type: &str) -> Result<bool, EventoryError> {
        let query = Self::base_query(aggregate_id, aggregate_type).limit(1);
        Ok(self.client.find_one(SNAPSHOTS, &query)?.is_some())
    }

    fn delete_oldest(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        keep: usize,
    ) -> Result<u64, EventoryError> {
        let query =
            Self::base_query(aggregate_id, aggregate_type).sort("version", SortOrder::Asc);
        let generations = self.client.find(SNAPSHOTS, &query)?;
        if generations.len() <= keep {
            return Ok(0);
        }
        let cutoff_index = generations.len() - keep;
        let Some(cutoff) = generations[cutoff_index - 1].get_u64("version") else {
            return Ok(0);
        };
        let doomed = Self::base_query(aggregate_id, aggregate_type).range("version", 1, cutoff);
        self.client.delete_many(SNAPSHOTS, &doomed)
    }
}
