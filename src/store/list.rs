use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::EventCodec;
use crate::error::EventoryError;
use crate::event::Event;

use super::{stamp_events, validate_aggregate_id, EventStore};

/// Metadata kept alongside each list key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListInfo {
    /// Monotonic append counter for the key. Never decreases, including
    /// across front-trims.
    pub version: u64,
    /// Number of entries removed from the front (compaction offset).
    pub base: u64,
    /// Number of entries currently in the list.
    pub len: u64,
}

/// Outcome of a version-guarded write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Applied { version: u64 },
    VersionMismatch { actual: u64 },
}

/// Required capabilities of the low-latency ordered-list backend.
///
/// The real wire client (a key-value/list server) is an external
/// collaborator; this trait captures only what the engine needs from it:
/// ordered lists with a per-key version counter as the compare-and-swap
/// primitive, range reads, front trims, and small versioned value slots.
pub trait ListClient: Send + Sync {
    /// Append entries iff the key's version counter equals
    /// `expected_version`. Counter advances by the number of entries.
    /// Atomic with respect to all other writes on the key.
    fn push_versioned(
        &self,
        key: &str,
        expected_version: u64,
        entries: Vec<String>,
    ) -> Result<CasOutcome, EventoryError>;

    /// Unconditional append. Returns the new counter value.
    fn push(&self, key: &str, entries: Vec<String>) -> Result<u64, EventoryError>;

    /// Read `count` entries starting at `start` (0-based index into the
    /// current list). `count == 0` reads to the end.
    fn range(&self, key: &str, start: u64, count: u64) -> Result<Vec<String>, EventoryError>;

    fn info(&self, key: &str) -> Result<ListInfo, EventoryError>;

    /// Remove up to `count` entries from the front, advancing `base`.
    /// Returns the number removed.
    fn trim_front(&self, key: &str, count: u64) -> Result<u64, EventoryError>;

    /// Read a value slot.
    fn kv_get(&self, key: &str) -> Result<Option<String>, EventoryError>;

    /// Write a value slot iff its version equals `expected_version`
    /// (0 for an absent slot), then set the version to `new_version`.
    fn kv_put_versioned(
        &self,
        key: &str,
        expected_version: u64,
        new_version: u64,
        value: String,
    ) -> Result<CasOutcome, EventoryError>;
}

#[derive(Default)]
struct ListEntry {
    items: Vec<String>,
    version: u64,
    base: u64,
}

/// In-memory rendition of the list backend.
///
/// Holds every list under one `RwLock`, so a version-guarded push is a
/// single conditional operation — the stand-in for the real server's CAS.
/// Clone-friendly: clones share the same underlying storage.
#[derive(Clone, Default)]
pub struct InMemoryListClient {
    lists: Arc<RwLock<HashMap<String, ListEntry>>>,
    values: Arc<RwLock<HashMap<String, (String, u64)>>>,
}

impl InMemoryListClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListClient for InMemoryListClient {
    fn push_versioned(
        &self,
        key: &str,
        expected_version: u64,
        entries: Vec<String>,
    ) -> Result<CasOutcome, EventoryError> {
        let mut lists = self
            .lists
            .write()
            .map_err(|_| EventoryError::backend("list write lock poisoned"))?;
        let entry = lists.entry(key.to_string()).or_default();
        if entry.version != expected_version {
            return Ok(CasOutcome::VersionMismatch {
                actual: entry.version,
            });
        }
        entry.version += entries.len() as u64;
        entry.items.extend(entries);
        Ok(CasOutcome::Applied {
            version: entry.version,
        })
    }

    fn push(&self, key: &str, entries: Vec<String>) -> Result<u64, EventoryError> {
        let mut lists = self
            .lists
            .write()
            .map_err(|_| EventoryError::backend("list write lock poisoned"))?;
        let entry = lists.entry(key.to_string()).or_default();
        entry.version += entries.len() as u64;
        entry.items.extend(entries);
        Ok(entry.version)
    }

    fn range(&self, key: &str, start: u64, count: u64) -> Result<Vec<String>, EventoryError> {
        let lists = self
            .lists
            .read()
            .map_err(|_| EventoryError::backend("list read lock poisoned"))?;
        let Some(entry) = lists.get(key) else {
            return Ok(Vec::new());
        };
        let start = start.min(entry.items.len() as u64) as usize;
        let end = if count == 0 {
            entry.items.len()
        } else {
            (start + count as usize).min(entry.items.len())
        };
        Ok(entry.items[start..end].to_vec())
    }

    fn info(&self, key: &str) -> Result<ListInfo, EventoryError> {
        let lists = self
            .lists
            .read()
            .map_err(|_| EventoryError::backend("list read lock poisoned"))?;
        Ok(lists
            .get(key)
            .map(|entry| ListInfo {
                version: entry.version,
                base: entry.base,
                len: entry.items.len() as u64,
            })
            .unwrap_or_default())
    }

    fn trim_front(&self, key: &str, count: u64) -> Result<u64, EventoryError> {
        let mut lists = self
            .lists
            .write()
            .map_err(|_| EventoryError::backend("list write lock poisoned"))?;
        let Some(entry) = lists.get_mut(key) else {
            return Ok(0);
        };
        let removed = count.min(entry.items.len() as u64);
        entry.items.drain(..removed as usize);
        entry.base += removed;
        Ok(removed)
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>, EventoryError> {
        let values = self
            .values
            .read()
            .map_err(|_| EventoryError::backend("kv read lock poisoned"))?;
        Ok(values.get(key).map(|(value, _)| value.clone()))
    }

    fn kv_put_versioned(
        &self,
        key: &str,
        expected_version: u64,
        new_version: u64,
        value: String,
    ) -> Result<CasOutcome, EventoryError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| EventoryError::backend("kv write lock poisoned"))?;
        let actual = values.get(key).map(|(_, version)| *version).unwrap_or(0);
        if actual != expected_version {
            return Ok(CasOutcome::VersionMismatch { actual });
        }
        values.insert(key.to_string(), (value, new_version));
        Ok(CasOutcome::Applied {
            version: new_version,
        })
    }
}

/// Event log over the list backend.
///
/// One list per aggregate; list position plus the trim offset is the
/// event version, and the key's append counter is the optimistic
/// concurrency guard.
#[derive(Clone)]
pub struct ListEventStore<C> {
    client: Arc<C>,
    codec: EventCodec,
}

impl<C: ListClient> ListEventStore<C> {
    pub fn new(client: Arc<C>, codec: EventCodec) -> Self {
        ListEventStore { client, codec }
    }

    fn key(aggregate_type: &str, aggregate_id: &str) -> String {
        format!("events:{}:{}", aggregate_type, aggregate_id)
    }
}

impl<C: ListClient> EventStore for ListEventStore<C> {
    fn append(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        events: &[Event],
        expected_version: u64,
    ) -> Result<(), EventoryError> {
        validate_aggregate_id(aggregate_id)?;
        if events.is_empty() {
            return Ok(());
        }

        let stamped = stamp_events(aggregate_id, aggregate_type, events, expected_version);
        let mut entries = Vec::with_capacity(stamped.len());
        for event in &stamped {
            let record = self.codec.encode(event)?;
            entries.push(serde_json::to_string(&record).map_err(EventoryError::serde)?);
        }

        let key = Self::key(aggregate_type, aggregate_id);
        match self.client.push_versioned(&key, expected_version, entries)? {
            CasOutcome::Applied { version } => {
                tracing::debug!(
                    aggregate_id,
                    aggregate_type,
                    version,
                    count = stamped.len(),
                    "events appended"
                );
                Ok(())
            }
            CasOutcome::VersionMismatch { actual } => Err(EventoryError::ConcurrencyConflict {
                aggregate_id: aggregate_id.to_string(),
                expected: expected_version,
                actual,
            }),
        }
    }

    fn load(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        from_version: u64,
        to_version: u64,
    ) -> Result<Vec<Event>, EventoryError> {
        validate_aggregate_id(aggregate_id)?;
        let key = Self::key(aggregate_type, aggregate_id);
        let info = self.client.info(&key)?;
        if info.len == 0 {
            return Ok(Vec::new());
        }

        let lo_version = info.base + 1;
        let hi_version = info.base + info.len;
        let start_version = from_version.max(1).max(lo_version);
        let end_version = if to_version == 0 {
            hi_version
        } else {
            to_version.min(hi_version)
        };
        if start_version > end_version {
            return Ok(Vec::new());
        }

        let start_index = start_version - lo_version;
        let count = end_version - start_version + 1;
        let entries = self.client.range(&key, start_index, count)?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let record: serde_json::Value =
                serde_json::from_str(&entry).map_err(EventoryError::serde)?;
            events.push(self.codec.decode(&record)?);
        }
        Ok(events)
    }

    fn last_version(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<u64, EventoryError> {
        validate_aggregate_id(aggregate_id)?;
        let key = Self::key(aggregate_type, aggregate_id);
        Ok(self.client.info(&key)?.version)
    }

    fn compact(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
        before_version: u64,
    ) -> Result<u64, EventoryError> {
        validate_aggregate_id(aggregate_id)?;
        if before_version <= 1 {
            return Ok(0);
        }
        let key = Self::key(aggregate_type, aggregate_id);
        let info = self.client.info(&key)?;
        let target_base = (before_version - 1).min(info.base + info.len);
        let trim = target_base.saturating_sub(info.base);
        let removed = self.client.trim_front(&key, trim)?;
        if removed > 0 {
            tracing::debug!(aggregate_id, aggregate_type, removed, "event log compacted");
        }
        Ok(removed)
    }
}
