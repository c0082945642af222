use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::EventoryError;

use super::payload::{ErasedPayload, EventPayload};

/// One registered event type: the concrete payload shape plus the
/// function pointers that recover it from an untyped document.
struct Registration {
    shape: TypeId,
    create: fn() -> Box<dyn ErasedPayload>,
    decode: fn(&Value) -> Result<Box<dyn ErasedPayload>, EventoryError>,
}

fn create_instance_of<T: EventPayload>() -> Box<dyn ErasedPayload> {
    Box::new(T::default())
}

fn decode_instance_of<T: EventPayload>(
    document: &Value,
) -> Result<Box<dyn ErasedPayload>, EventoryError> {
    let payload: T = serde_json::from_value(document.clone()).map_err(EventoryError::serde)?;
    Ok(Box::new(payload))
}

/// Runtime mapping from event type name to payload shape.
///
/// The storage layer only understands untyped documents; this registry is
/// the single place where the `event_type` string tag is turned back into
/// a concrete payload type at read time. Populate it at process start,
/// before any decoding happens.
///
/// Clone-friendly: clones share the same underlying table, following the
/// same pattern as the in-memory stores.
#[derive(Clone, Default)]
pub struct EventTypeRegistry {
    table: Arc<RwLock<HashMap<String, Registration>>>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload shape under its `EVENT_TYPE` name.
    ///
    /// Re-registering the same shape under the same name is a no-op.
    /// Re-registering a different shape under an existing name fails with
    /// [`EventoryError::AlreadyRegisteredIncompatible`].
    pub fn register<T: EventPayload>(&self) -> Result<(), EventoryError> {
        let mut table = self
            .table
            .write()
            .map_err(|_| EventoryError::backend("registry lock poisoned"))?;

        if let Some(existing) = table.get(T::EVENT_TYPE) {
            if existing.shape == TypeId::of::<T>() {
                return Ok(());
            }
            return Err(EventoryError::AlreadyRegisteredIncompatible(
                T::EVENT_TYPE.to_string(),
            ));
        }

        table.insert(
            T::EVENT_TYPE.to_string(),
            Registration {
                shape: TypeId::of::<T>(),
                create: create_instance_of::<T>,
                decode: decode_instance_of::<T>,
            },
        );
        tracing::debug!(event_type = T::EVENT_TYPE, "event type registered");
        Ok(())
    }

    /// Create a fresh, empty instance of the registered shape.
    pub fn create_instance(&self, event_type: &str) -> Result<Box<dyn ErasedPayload>, EventoryError> {
        let table = self
            .table
            .read()
            .map_err(|_| EventoryError::backend("registry lock poisoned"))?;
        let registration = table
            .get(event_type)
            .ok_or_else(|| EventoryError::UnknownEventType(event_type.to_string()))?;
        Ok((registration.create)())
    }

    /// Populate a typed payload instance from an untyped document.
    ///
    /// Envelope fields present in the document are ignored; only the
    /// fields of the registered shape are read.
    pub fn decode_payload(
        &self,
        event_type: &str,
        document: &Value,
    ) -> Result<Box<dyn ErasedPayload>, EventoryError> {
        let table = self
            .table
            .read()
            .map_err(|_| EventoryError::backend("registry lock poisoned"))?;
        let registration = table
            .get(event_type)
            .ok_or_else(|| EventoryError::UnknownEventType(event_type.to_string()))?;
        (registration.decode)(document)
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.table
            .read()
            .map(|table| table.contains_key(event_type))
            .unwrap_or(false)
    }

    /// All registered type names, sorted for stable output.
    pub fn registered_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .table
            .read()
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
