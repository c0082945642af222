use serde_json::{Map, Number, Value};

/// A single value inside an ordered backend document.
///
/// This is the wire shape spoken by the document backend: key order is
/// preserved and nested structures stay in this representation. It must
/// never escape the storage boundary — the codec canonicalizes every
/// `RawValue` tree into plain [`serde_json::Value`] before any typed
/// decoding happens.
#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Array(Vec<RawValue>),
    Doc(RawDocument),
}

/// An ordered document: a sequence of `(key, value)` entries.
///
/// Lookups scan in insertion order; last write for a key wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDocument {
    entries: Vec<(String, RawValue)>,
}

impl RawDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: RawValue) {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// String field accessor, used for filter matching.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(RawValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Non-negative integer field accessor, used for version fields.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(RawValue::Int(n)) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }

    pub fn entries(&self) -> &[(String, RawValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert a canonical JSON document into the ordered representation.
    ///
    /// This is the write-path direction; non-document values are rejected
    /// by callers before reaching here.
    pub fn from_value(value: &Value) -> RawDocument {
        let mut doc = RawDocument::new();
        if let Value::Object(map) = value {
            for (key, val) in map {
                doc.insert(key.clone(), RawValue::from_value(val));
            }
        }
        doc
    }
}

impl RawValue {
    pub fn from_value(value: &Value) -> RawValue {
        match value {
            Value::Null => RawValue::Null,
            Value::Bool(b) => RawValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RawValue::Int(i)
                } else {
                    RawValue::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => RawValue::Text(s.clone()),
            Value::Array(items) => {
                RawValue::Array(items.iter().map(RawValue::from_value).collect())
            }
            Value::Object(_) => RawValue::Doc(RawDocument::from_value(value)),
        }
    }

    /// Naive conversion back to JSON, preserving nothing about ordering.
    ///
    /// Used by the in-memory client internals only; the codec's
    /// canonicalization pass is the public read path.
    pub(crate) fn to_value(&self) -> Value {
        match self {
            RawValue::Null => Value::Null,
            RawValue::Bool(b) => Value::Bool(*b),
            RawValue::Int(i) => Value::Number(Number::from(*i)),
            RawValue::Double(d) => Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            RawValue::Text(s) => Value::String(s.clone()),
            RawValue::Array(items) => Value::Array(items.iter().map(RawValue::to_value).collect()),
            RawValue::Doc(doc) => {
                let mut map = Map::new();
                for (key, val) in doc.entries() {
                    map.insert(key.clone(), val.to_value());
                }
                Value::Object(map)
            }
        }
    }
}
