use serde_json::{Map, Number, Value};

use crate::store::document::{RawDocument, RawValue};

/// Convert an ordered backend document into the canonical JSON shape.
///
/// Every nested structured value — however deep — comes out as a plain
/// key→value map or ordered sequence. Typed decoding must only ever see
/// the canonical shape; handing a `RawValue` tree to serde directly is
/// exactly the leakage this pass exists to prevent.
pub fn canonicalize_document(document: &RawDocument) -> Value {
    let mut map = Map::with_capacity(document.len());
    for (key, value) in document.entries() {
        map.insert(key.clone(), canonicalize_value(value));
    }
    Value::Object(map)
}

/// Recursive canonicalization of a single backend value.
pub fn canonicalize_value(value: &RawValue) -> Value {
    match value {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Int(i) => Value::Number(Number::from(*i)),
        RawValue::Double(d) => Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        RawValue::Text(s) => Value::String(s.clone()),
        RawValue::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        RawValue::Doc(doc) => canonicalize_document(doc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalizes_scalars() {
        assert_eq!(canonicalize_value(&RawValue::Null), Value::Null);
        assert_eq!(canonicalize_value(&RawValue::Bool(true)), json!(true));
        assert_eq!(canonicalize_value(&RawValue::Int(-3)), json!(-3));
        assert_eq!(canonicalize_value(&RawValue::Double(1.5)), json!(1.5));
        assert_eq!(
            canonicalize_value(&RawValue::Text("ore".into())),
            json!("ore")
        );
    }

    #[test]
    fn canonicalizes_documents_nested_in_arrays_in_documents() {
        let mut inner = RawDocument::new();
        inner.insert("gold", RawValue::Int(7));

        let mut middle = RawDocument::new();
        middle.insert(
            "ledger",
            RawValue::Array(vec![
                RawValue::Doc(inner),
                RawValue::Array(vec![RawValue::Text("nested".into())]),
            ]),
        );

        let mut outer = RawDocument::new();
        outer.insert("treasury", RawValue::Doc(middle));

        let canonical = canonicalize_document(&outer);
        assert_eq!(
            canonical,
            json!({
                "treasury": {
                    "ledger": [ { "gold": 7 }, ["nested"] ],
                }
            })
        );
    }

    #[test]
    fn non_finite_double_becomes_null() {
        assert_eq!(canonicalize_value(&RawValue::Double(f64::NAN)), Value::Null);
    }
}
