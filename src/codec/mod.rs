//! Serialization boundary between typed events and untyped storage
//! documents.

mod canonical;

pub use canonical::{canonicalize_document, canonicalize_value};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EventoryError;
use crate::event::{Event, EventTypeRegistry};
use crate::store::document::RawDocument;

/// Field names of the flat stored event document.
pub mod fields {
    pub const EVENT_ID: &str = "event_id";
    pub const EVENT_TYPE: &str = "event_type";
    pub const AGGREGATE_ID: &str = "aggregate_id";
    pub const AGGREGATE_TYPE: &str = "aggregate_type";
    pub const EVENT_VERSION: &str = "event_version";
    pub const TIMESTAMP: &str = "timestamp";
    pub const METADATA: &str = "metadata";
}

/// Encodes events into flat JSON documents and decodes them back through
/// the type registry.
///
/// Encoding merges envelope metadata and payload fields into one flat
/// record; payload field names take precedence on collision. Decoding
/// extracts the `event_type` tag, asks the registry for the matching
/// shape, and populates a fresh instance from the record.
#[derive(Clone)]
pub struct EventCodec {
    registry: EventTypeRegistry,
}

impl EventCodec {
    pub fn new(registry: EventTypeRegistry) -> Self {
        EventCodec { registry }
    }

    pub fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    /// Merge the envelope and payload into one flat document.
    pub fn encode(&self, event: &Event) -> Result<Value, EventoryError> {
        let mut record = Map::new();
        record.insert(
            fields::EVENT_ID.into(),
            Value::String(event.event_id.to_string()),
        );
        record.insert(
            fields::EVENT_TYPE.into(),
            Value::String(event.event_type().to_string()),
        );
        record.insert(
            fields::AGGREGATE_ID.into(),
            Value::String(event.aggregate_id.clone()),
        );
        record.insert(
            fields::AGGREGATE_TYPE.into(),
            Value::String(event.aggregate_type.clone()),
        );
        record.insert(fields::EVENT_VERSION.into(), Value::from(event.version));
        record.insert(
            fields::TIMESTAMP.into(),
            serde_json::to_value(event.timestamp).map_err(EventoryError::serde)?,
        );
        record.insert(
            fields::METADATA.into(),
            Value::Object(event.metadata.clone().into_iter().collect()),
        );

        let payload_doc = event.payload.to_document()?;
        if let Value::Object(payload_fields) = payload_doc {
            // Payload fields win on collision with envelope fields.
            for (key, value) in payload_fields {
                record.insert(key, value);
            }
        }

        Ok(Value::Object(record))
    }

    /// Reconstruct a typed event from a flat document.
    pub fn decode(&self, record: &Value) -> Result<Event, EventoryError> {
        let map = match record {
            Value::Object(map) => map,
            _ => {
                return Err(EventoryError::Serialization(
                    "stored event record is not a document".into(),
                ))
            }
        };

        let event_type = match map.get(fields::EVENT_TYPE) {
            Some(Value::String(name)) => name.as_str(),
            Some(_) | None => return Err(EventoryError::MissingEventType),
        };

        let payload = self.registry.decode_payload(event_type, record)?;

        Ok(Event {
            event_id: parse_event_id(map)?,
            aggregate_id: required_str(map, fields::AGGREGATE_ID)?,
            aggregate_type: required_str(map, fields::AGGREGATE_TYPE)?,
            version: required_version(map)?,
            timestamp: parse_timestamp(map)?,
            metadata: parse_metadata(map),
            payload,
        })
    }

    /// Decode a record arriving in the backend's ordered representation.
    ///
    /// Canonicalization happens first so no `RawValue` survives into the
    /// typed payload, at any nesting depth.
    pub fn decode_raw(&self, record: &RawDocument) -> Result<Event, EventoryError> {
        let canonical = canonicalize_document(record);
        self.decode(&canonical)
    }

    /// Serialize an aggregate state (snapshot or state-based document).
    pub fn encode_state<T: Serialize>(&self, state: &T) -> Result<Value, EventoryError> {
        encode_state(state)
    }

    /// Deserialize an aggregate state from its canonical document.
    pub fn decode_state<T: DeserializeOwned>(&self, document: &Value) -> Result<T, EventoryError> {
        decode_state(document)
    }
}

/// Serialize an aggregate state into its canonical document form.
pub fn encode_state<T: Serialize>(state: &T) -> Result<Value, EventoryError> {
    let value = serde_json::to_value(state).map_err(EventoryError::serde)?;
    match value {
        Value::Object(_) => Ok(value),
        other => Err(EventoryError::Serialization(format!(
            "aggregate state must serialize to a document, got {}",
            type_name_of(&other)
        ))),
    }
}

/// Deserialize an aggregate state from its canonical document form.
pub fn decode_state<T: DeserializeOwned>(document: &Value) -> Result<T, EventoryError> {
    serde_json::from_value(document.clone()).map_err(EventoryError::serde)
}

fn required_str(map: &Map<String, Value>, field: &str) -> Result<String, EventoryError> {
    match map.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(EventoryError::Serialization(format!(
            "stored event record is missing field {}",
            field
        ))),
    }
}

fn required_version(map: &Map<String, Value>) -> Result<u64, EventoryError> {
    map.get(fields::EVENT_VERSION)
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            EventoryError::Serialization(format!(
                "stored event record is missing field {}",
                fields::EVENT_VERSION
            ))
        })
}

fn parse_event_id(map: &Map<String, Value>) -> Result<Uuid, EventoryError> {
    let raw = required_str(map, fields::EVENT_ID)?;
    Uuid::parse_str(&raw)
        .map_err(|e| EventoryError::Serialization(format!("invalid event id {}: {}", raw, e)))
}

fn parse_timestamp(map: &Map<String, Value>) -> Result<DateTime<Utc>, EventoryError> {
    let value = map.get(fields::TIMESTAMP).ok_or_else(|| {
        EventoryError::Serialization(format!(
            "stored event record is missing field {}",
            fields::TIMESTAMP
        ))
    })?;
    serde_json::from_value(value.clone()).map_err(EventoryError::serde)
}

fn parse_metadata(map: &Map<String, Value>) -> BTreeMap<String, Value> {
    match map.get(fields::METADATA) {
        Some(Value::Object(bag)) => bag.clone().into_iter().collect(),
        _ => BTreeMap::new(),
    }
}

fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "document",
    }
}
