use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::EventCodec;
use crate::error::EventoryError;
use crate::event::Event;

use super::document::RawDocument;
use super::{stamp_events, validate_aggregate_id, EventStore};

/// Sort direction for a numeric field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A minimal query: string-equality filters, an optional numeric range
/// on one field, an optional numeric sort, and a result limit.
///
/// This is deliberately not a query language — it is the exact set of
/// access paths the engine needs from an indexed document collection.
#[derive(Clone, Debug, Default)]
pub struct DocQuery {
    eq: Vec<(String, String)>,
    range_field: Option<String>,
    range_min: u64,
    range_max: u64,
    sort: Option<(String, SortOrder)>,
    limit: usize,
}

impl DocQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq.push((field.into(), value.into()));
        self
    }

    /// Numeric range filter, inclusive on both ends. A bound of 0 is
    /// unbounded (stored versions start at 1).
    pub fn range(mut self, field: impl Into<String>, min: u64, max: u64) -> Self {
        self.range_field = Some(field.into());
        self.range_min = min;
        self.range_max = max;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, doc: &RawDocument) -> bool {
        for (field, value) in &self.eq {
            if doc.get_str(field) != Some(value.as_str()) {
                return false;
            }
        }
        if let Some(field) = &self.range_field {
            let Some(version) = doc.get_u64(field) else {
                return false;
            };
            if self.range_min != 0 && version < self.range_min {
                return false;
            }
            if self.range_max != 0 && version > self.range_max {
                return false;
            }
        }
        true
    }
}

/// Outcome of a guarded (transactional) write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    PreconditionFailed { actual: u64 },
}

/// Required capabilities of the durable document backend.
///
/// The real wire client (a transactional document store) is an external
/// collaborator; this trait captures only what the engine needs: unique
/// indexes, transactionally guarded inserts and replaces, and filtered
/// reads/deletes. Documents cross this boundary in the backend's ordered
/// representation — canonicalization back to plain maps is the codec's
/// job on the way out.
pub trait DocClient: Send + Sync {
    /// Declare a unique index over `fields`. Idempotent.
    fn ensure_unique_index(&self, collection: &str, fields: &[&str])
        -> Result<(), EventoryError>;

    /// Transactionally insert a batch: the maximum of `version_field`
    /// over documents matching `guard_eq` must equal `expected` (0 when
    /// none match), and every unique index must hold for the batch.
    /// On precondition failure nothing is inserted.
    fn insert_guarded(
        &self,
        collection: &str,
        guard_eq: &[(String, String)],
        version_field: &str,
        expected: u64,
        docs: Vec<RawDocument>,
    ) -> Result<TxOutcome, EventoryError>;

    /// Insert one document, enforcing unique indexes.
    fn insert_one(&self, collection: &str, doc: RawDocument) -> Result<(), EventoryError>;

    /// Conditionally replace the single document matching `guard_eq`:
    /// its `version_field` must equal `expected`; `expected == 0` with no
    /// matching document inserts instead (upsert-if-absent).
    fn replace_guarded(
        &self,
        collection: &str,
        guard_eq: &[(String, String)],
        version_field: &str,
        expected: u64,
        doc: RawDocument,
    ) -> Result<TxOutcome, EventoryError>;

    fn find(&self, collection: &str, query: &DocQuery) -> Result<Vec<RawDocument>, EventoryError>;

    fn find_one(
        &self,
        collection: &str,
        query: &DocQuery,
    ) -> Result<Option<RawDocument>, EventoryError>;

    fn delete_many(&self, collection: &str, query: &DocQuery) -> Result<u64, EventoryError>;
}

#[derive(Default)]
struct Collection {
    docs: Vec<RawDocument>,
    unique_indexes: Vec<Vec<String>>,
}

impl Collection {
    fn index_key(fields: &[String], doc: &RawDocument) -> String {
        let mut key = String::new();
        for field in fields {
            match doc.get(field) {
                Some(value) => key.push_str(&format!("{:?}|", value)),
                None => key.push_str("<missing>|"),
            }
        }
        key
    }

    /// Check that `incoming` violates no unique index against the stored
    /// documents or within itself.
    fn check_unique(&self, incoming: &[RawDocument]) -> Result<(), EventoryError> {
        for fields in &self.unique_indexes {
            let mut seen: Vec<String> = self
                .docs
                .iter()
                .map(|doc| Self::index_key(fields, doc))
                .collect();
            for doc in incoming {
                let key = Self::index_key(fields, doc);
                if seen.contains(&key) {
                    return Err(EventoryError::Backend(format!(
                        "unique index violation on ({})",
                        fields.join(", ")
                    )));
                }
                seen.push(key);
            }
        }
        Ok(())
    }
}

/// In-memory rendition of the document backend.
///
/// All collections live under one `RwLock`; guarded writes take the
/// write lock once, which models the real backend's multi-document
/// transaction.
#[derive(Clone, Default)]
pub struct InMemoryDocClient {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryDocClient {
    pub fn new() -> Self {
        Self::default()
    }
}

fn guard_actual(
    collection: &Collection,
    guard_eq: &[(String, String)],
    version_field: &str,
) -> u64 {
    collection
        .docs
        .iter()
        .filter(|doc| {
            guard_eq
                .iter()
                .all(|(field, value)| doc.get_str(field) == Some(value.as_str()))
        })
        .filter_map(|doc| doc.get_u64(version_field))
        .max()
        .unwrap_or(0)
}

impl DocClient for InMemoryDocClient {
    fn ensure_unique_index(
        &self,
        collection: &str,
        fields: &[&str],
    ) -> Result<(), EventoryError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| EventoryError::backend("collection write lock poisoned"))?;
        let coll = collections.entry(collection.to_string()).or_default();
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        if !coll.unique_indexes.contains(&fields) {
            coll.unique_indexes.push(fields);
        }
        Ok(())
    }

    fn insert_guarded(
        &self,
        collection: &str,
        guard_eq: &[(String, String)],
        version_field: &str,
        expected: u64,
        docs: Vec<RawDocument>,
    ) -> Result<TxOutcome, EventoryError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| EventoryError::backend("collection write lock poisoned"))?;
        let coll = collections.entry(collection.to_string()).or_default();

        let actual = guard_actual(coll, guard_eq, version_field);
        if actual != expected {
            return Ok(TxOutcome::PreconditionFailed { actual });
        }
        coll.check_unique(&docs)?;
        coll.docs.extend(docs);
        Ok(TxOutcome::Committed)
    }

    fn insert_one(&self, collection: &str, doc: RawDocument) -> Result<(), EventoryError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| EventoryError::backend("collection write lock poisoned"))?;
        let coll = collections.entry(collection.to_string()).or_default();
        coll.check_unique(std::slice::from_ref(&doc))?;
        coll.docs.push(doc);
        Ok(())
    }

    fn replace_guarded(
        &self,
        collection: &str,
        guard_eq: &[(String, String)],
        version_field: &str,
        expected: u64,
        doc: RawDocument,
    ) -> Result<TxOutcome, EventoryError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| EventoryError::backend("collection write lock poisoned"))?;
        let coll = collections.entry(collection.to_string()).or_default();

        let position = coll.docs.iter().position(|existing| {
            guard_eq
                .iter()
                .all(|(field, value)| existing.get_str(field) == Some(value.as_str()))
        });

        match position {
            Some(index) => {
                let actual = coll.docs[index].get_u64(version_field).unwrap_or(0);
                if actual != expected {
                    return Ok(TxOutcome::PreconditionFailed { actual });
                }
                coll.docs[index] = doc;
                Ok(TxOutcome::Committed)
            }
            None => {
                if expected != 0 {
                    return Ok(TxOutcome::PreconditionFailed { actual: 0 });
                }
                coll.check_unique(std::slice::from_ref(&doc))?;
                coll.docs.push(doc);
                Ok(TxOutcome::Committed)
            }
        }
    }

    fn find(&self, collection: &str, query: &DocQuery) -> Result<Vec<RawDocument>, EventoryError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| EventoryError::backend("collection read lock poisoned"))?;
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut results: Vec<RawDocument> = coll
            .docs
            .iter()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();

        if let Some((field, order)) = &query.sort {
            results.sort_by_key(|doc| doc.get_u64(field).unwrap_or(0));
            if *order == SortOrder::Desc {
                results.reverse();
            }
        }
        if query.limit != 0 {
            results.truncate(query.limit);
        }
        Ok(results)
    }

    fn find_one(
        &self,
        collection: &str,
        query: &DocQuery,
    ) -> Result<Option<RawDocument>, EventoryError> {
        let mut results = self.find(collection, &query.clone().limit(1))?;
        Ok(results.pop())
    }

    fn delete_many(&self, collection: &str, query: &DocQuery) -> Result<u64, EventoryError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| EventoryError::backend("collection write lock poisoned"))?;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = coll.docs.len();
        coll.docs.retain(|doc| !query.matches(doc));
        Ok((before - coll.docs.len()) as u64)
    }
}

/// Event log over the document backend.
///
/// Each event is one document in the `events` collection, protected by
/// the `(aggregate_id, event_version)` and `event_id` unique indexes;
/// the append guard runs inside the backend transaction.
#[derive(Clone)]
pub struct DocEventStore<C> {
    client: Arc<C>,
    codec: EventCodec,
}

const EVENTS: &str = "events";

impl<C: DocClient> DocEventStore<C> {
    /// Build the store and declare the indexes it relies on.
    pub fn new(client: Arc<C>, codec: EventCodec) -> Result<Self, EventoryError> {
        client.ensure_unique_index(EVENTS, &["aggregate_id", "event_version"])?;
        client.ensure_unique_index(EVENTS, &["event_id"])?;
        Ok(DocEventStore { client, codec })
    }

    fn guard(aggregate_id: &str, aggregate_type: &str) -> Vec<(String, String)> {
        vec![
            ("aggregate_id".to_string(), aggregate_id.to_string()),
            ("aggregate_type".to_string(), aggregate_type.to_string()),
        ]
    }

    /// Scan events of one type across aggregates, in insertion order.
    /// Secondary access path for downstream consumers.
    pub fn load_by_event_type(&self, event_type: &str) -> Result<Vec<Event>, EventoryError> {
        let query = DocQuery::new().eq("event_type", event_type);
        let docs = self.client.find(EVENTS, &query)?;
        docs.iter().map(|doc| self.codec.decode_raw(doc)).collect()
    }
}

impl<C: DocClient> EventStore for DocEventStore<C> {
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
        let mut docs = Vec::with_capacity(stamped.len());
        for event in &stamped {
            let record = self.codec.encode(event)?;
            docs.push(RawDocument::from_value(&record));
        }

        let outcome = self.client.insert_guarded(
            EVENTS,
            &Self::guard(aggregate_id, aggregate_type),
            "event_version",
            expected_version,
            docs,
        )?;
        match outcome {
            TxOutcome::Committed => {
                tracing::debug!(
                    aggregate_id,
                    aggregate_type,
                    count = stamped.len(),
                    "events appended"
                );
                Ok(())
            }
            TxOutcome::PreconditionFailed { actual } => Err(EventoryError::ConcurrencyConflict {
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
        let query = DocQuery::new()
            .eq("aggregate_id", aggregate_id)
            .eq("aggregate_type", aggregate_type)
            .range("event_version", from_version.max(1), to_version)
            .sort("event_version", SortOrder::Asc);
        let docs = self.client.find(EVENTS, &query)?;
        docs.iter().map(|doc| self.codec.decode_raw(doc)).collect()
    }

    fn last_version(
        &self,
        aggregate_id: &str,
        aggregate_type: &str,
    ) -> Result<u64, EventoryError> {
        validate_aggregate_id(aggregate_id)?;
        let query = DocQuery::new()
            .eq("aggregate_id", aggregate_id)
            .eq("aggregate_type", aggregate_type)
            .sort("event_version", SortOrder::Desc)
            .limit(1);
        let latest = self.client.find_one(EVENTS, &query)?;
        Ok(latest
            .and_then(|doc| doc.get_u64("event_version"))
            .unwrap_or(0))
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
        let query = DocQuery::new()
            .eq("aggregate_id", aggregate_id)
            .eq("aggregate_type", aggregate_type)
            .range("event_version", 1, before_version - 1);
        let removed = self.client.delete_many(EVENTS, &query)?;
        if removed > 0 {
            tracing::debug!(aggregate_id, aggregate_type, removed, "event log compacted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, EventTypeRegistry};
    use crate::store::document::RawValue;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Counted {
        n: u64,
    }

    impl EventPayload for Counted {
        const EVENT_TYPE: &'static str = "Counted";
    }

    fn store() -> DocEventStore<InMemoryDocClient> {
        let registry = EventTypeRegistry::new();
        registry.register::<Counted>().unwrap();
        DocEventStore::new(
            Arc::new(InMemoryDocClient::new()),
            EventCodec::new(registry),
        )
        .unwrap()
    }

    fn event(n: u64) -> Event {
        Event::new("", "", 0, Box::new(Counted { n }))
    }

    fn doc(pairs: &[(&str, RawValue)]) -> RawDocument {
        let mut doc = RawDocument::new();
        for (key, value) in pairs {
            doc.insert(*key, value.clone());
        }
        doc
    }

    #[test]
    fn insert_guarded_checks_version_precondition() {
        let client = InMemoryDocClient::new();
        let guard = vec![("aggregate_id".to_string(), "a-1".to_string())];

        let first = client
            .insert_guarded(
                "events",
                &guard,
                "event_version",
                0,
                vec![doc(&[
                    ("aggregate_id", RawValue::Text("a-1".into())),
                    ("event_version", RawValue::Int(1)),
                ])],
            )
            .unwrap();
        assert_eq!(first, TxOutcome::Committed);

        let stale = client
            .insert_guarded(
                "events",
                &guard,
                "event_version",
                0,
                vec![doc(&[
                    ("aggregate_id", RawValue::Text("a-1".into())),
                    ("event_version", RawValue::Int(2)),
                ])],
            )
            .unwrap();
        assert_eq!(stale, TxOutcome::PreconditionFailed { actual: 1 });
    }

    #[test]
    fn unique_index_rejects_duplicates_atomically() {
        let client = InMemoryDocClient::new();
        client
            .ensure_unique_index("events", &["event_id"])
            .unwrap();

        let batch = vec![
            doc(&[("event_id", RawValue::Text("e-1".into()))]),
            doc(&[("event_id", RawValue::Text("e-1".into()))]),
        ];
        let err = client
            .insert_guarded("events", &[], "event_version", 0, batch)
            .unwrap_err();
        assert!(matches!(err, EventoryError::Backend(_)));
        assert!(client
            .find("events", &DocQuery::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn replace_guarded_upserts_when_absent() {
        let client = InMemoryDocClient::new();
        let guard = vec![("aggregate_id".to_string(), "a-1".to_string())];

        let inserted = client
            .replace_guarded(
                "states",
                &guard,
                "version",
                0,
                doc(&[
                    ("aggregate_id", RawValue::Text("a-1".into())),
                    ("version", RawValue::Int(2)),
                ]),
            )
            .unwrap();
        assert_eq!(inserted, TxOutcome::Committed);

        let conflict = client
            .replace_guarded(
                "states",
                &guard,
                "version",
                1,
                doc(&[
                    ("aggregate_id", RawValue::Text("a-1".into())),
                    ("version", RawValue::Int(3)),
                ]),
            )
            .unwrap();
        assert_eq!(conflict, TxOutcome::PreconditionFailed { actual: 2 });
    }

    #[test]
    fn append_load_round_trip() {
        let store = store();
        store
            .append("guild-1", "guild", &[event(1), event(2), event(3)], 0)
            .unwrap();

        let events = store.load("guild-1", "guild", 1, 0).unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(events[2].payload_as::<Counted>().unwrap().n, 3);
    }

    #[test]
    fn stale_append_conflicts_and_persists_nothing() {
        let store = store();
        store.append("guild-1", "guild", &[event(1)], 0).unwrap();

        let err = store
            .append("guild-1", "guild", &[event(2), event(3)], 0)
            .unwrap_err();
        assert_eq!(
            err,
            EventoryError::ConcurrencyConflict {
                aggregate_id: "guild-1".into(),
                expected: 0,
                actual: 1,
            }
        );
        assert_eq!(store.last_version("guild-1", "guild").unwrap(), 1);
    }

    #[test]
    fn ranged_load_and_last_version() {
        let store = store();
        store
            .append("guild-1", "guild", &[event(1), event(2), event(3)], 0)
            .unwrap();

        let tail = store.load("guild-1", "guild", 2, 0).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].version, 2);
        assert_eq!(store.last_version("guild-1", "guild").unwrap(), 3);
    }

    #[test]
    fn compact_removes_only_older_versions() {
        let store = store();
        store
            .append(
                "guild-1",
                "guild",
                &[event(1), event(2), event(3), event(4), event(5)],
                0,
            )
            .unwrap();

        assert_eq!(store.compact("guild-1", "guild", 5).unwrap(), 4);
        let remaining = store.load("guild-1", "guild", 1, 0).unwrap();
        let versions: Vec<u64> = remaining.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![5]);
        assert_eq!(store.last_version("guild-1", "guild").unwrap(), 5);
    }

    #[test]
    fn aggregates_are_independent() {
        let store = store();
        store.append("guild-1", "guild", &[event(1)], 0).unwrap();
        store
            .append("guild-2", "guild", &[event(1), event(2)], 0)
            .unwrap();

        assert_eq!(store.last_version("guild-1", "guild").unwrap(), 1);
        assert_eq!(store.last_version("guild-2", "guild").unwrap(), 2);
    }

    #[test]
    fn load_by_event_type_scans_across_aggregates() {
        let store = store();
        store.append("guild-1", "guild", &[event(1)], 0).unwrap();
        store.append("guild-2", "guild", &[event(2)], 0).unwrap();

        let all = store.load_by_event_type("Counted").unwrap();
        assert_eq!(all.len(), 2);
        assert!(store.load_by_event_type("Ghost").unwrap().is_empty());
    }
}
