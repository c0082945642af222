use std::any::Any;
use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::EventoryError;

/// Trait for concrete event payload types.
///
/// A payload is a plain serde struct carrying the domain-specific fields
/// of one event type. The `EVENT_TYPE` name is what gets written into the
/// stored record and what the registry dispatches on at decode time.
pub trait EventPayload:
    Clone + fmt::Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The type tag written into stored records for this payload shape.
    const EVENT_TYPE: &'static str;
}

/// Object-safe, type-erased form of [`EventPayload`].
///
/// Envelopes hold payloads through this trait so a single event stream
/// can carry heterogeneous payload types. Concrete access goes through
/// [`ErasedPayload::as_any`] downcasting; storage access goes through
/// [`ErasedPayload::to_document`].
pub trait ErasedPayload: Any + fmt::Debug + Send + Sync {
    /// The type tag for this payload.
    fn event_type(&self) -> &'static str;

    /// Serialize the payload fields into a JSON document.
    fn to_document(&self) -> Result<Value, EventoryError>;

    fn clone_box(&self) -> Box<dyn ErasedPayload>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: EventPayload> ErasedPayload for T {
    fn event_type(&self) -> &'static str {
        T::EVENT_TYPE
    }

    fn to_document(&self) -> Result<Value, EventoryError> {
        let value = serde_json::to_value(self).map_err(EventoryError::serde)?;
        match value {
            Value::Object(_) => Ok(value),
            // Unit payloads serialize to null; store them as an empty document.
            Value::Null => Ok(Value::Object(serde_json::Map::new())),
            other => Err(EventoryError::Serialization(format!(
                "payload {} must serialize to a document, got {}",
                T::EVENT_TYPE,
                kind_of(&other)
            ))),
        }
    }

    fn clone_box(&self) -> Box<dyn ErasedPayload> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Clone for Box<dyn ErasedPayload> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "document",
    }
}
