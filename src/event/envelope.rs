use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::payload::ErasedPayload;

/// One stored unit of history: the envelope metadata plus a typed payload.
///
/// Versions are 1-based and contiguous per aggregate once committed.
/// Events are immutable after append; compaction is the only physical
/// removal path.
#[derive(Debug)]
pub struct Event {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// Position within the aggregate stream. Assigned provisionally when
    /// the change is recorded and normalized by the store on append.
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Open metadata bag (correlation ids, actor, ...).
    pub metadata: BTreeMap<String, Value>,
    pub payload: Box<dyn ErasedPayload>,
}

impl Event {
    /// Build an envelope around a payload. Event id and timestamp are
    /// assigned here; the version is stamped by the caller.
    pub fn new(
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        version: u64,
        payload: Box<dyn ErasedPayload>,
    ) -> Self {
        Event {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            payload,
        }
    }

    /// The payload's type tag.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Downcast the payload to its concrete type.
    pub fn payload_as<T: 'static>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Event {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            version: self.version,
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
            payload: self.payload.clone_box(),
        }
    }
}
