//! Datafile line encoding.
//!
//! Records are JSON, one per line, with a single transform: dates are
//! written as `{"$$date": <millis>}`. Encoding rejects field names that
//! contain `.` or begin with `$`, except the four reserved sentinels
//! used by the persistence layer.

use crate::doc::is_valid_key;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Sentinel keys legal only at the serialization layer.
const RESERVED_KEYS: [&str; 4] = ["$$date", "$$deleted", "$$indexCreated", "$$indexRemoved"];

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Encodes a record as a single JSON line.
pub fn serialize(value: &Value) -> CodecResult<String> {
    let json = to_wire(value)?;
    Ok(serde_json::to_string(&json)?)
}

/// Decodes a single JSON line back into a record.
pub fn deserialize(line: &str) -> CodecResult<Value> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    Ok(from_wire(json))
}

fn to_wire(value: &Value) -> CodecResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(ms) => serde_json::json!({ "$$date": ms }),
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(to_wire).collect::<CodecResult<_>>()?,
        ),
        Value::Object(pairs) => {
            let mut map = serde_json::Map::with_capacity(pairs.len());
            for (key, child) in pairs {
                if !is_valid_key(key) && !is_reserved(key) {
                    return Err(CodecError::bad_key(key));
                }
                map.insert(key.clone(), to_wire(child)?);
            }
            serde_json::Value::Object(map)
        }
    })
}

/// Integral numbers are written without a fractional part so files stay
/// stable across save and load. Non-finite numbers become JSON null.
fn number_to_json(n: f64) -> serde_json::Value {
    const I64_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() < I64_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn from_wire(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(from_wire).collect())
        }
        serde_json::Value::Object(map) => {
            // The date transform: an object whose sole key is $$date
            if map.len() == 1 {
                if let Some(serde_json::Value::Number(ms)) = map.get("$$date") {
                    if let Some(ms) = ms.as_i64() {
                        return Value::Date(ms);
                    }
                }
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, from_wire(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn round_trip_simple_document() {
        let v = doc(serde_json::json!({"_id": "abc", "n": 3, "ok": true, "t": null}));
        let line = serialize(&v).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(deserialize(&line).unwrap(), v);
    }

    #[test]
    fn date_transform() {
        let mut v = doc(serde_json::json!({"_id": "abc"}));
        v.set("at", Value::Date(1_700_000_000_000));
        let line = serialize(&v).unwrap();
        assert!(line.contains("\"$$date\":1700000000000"));
        assert_eq!(deserialize(&line).unwrap().get("at"), Some(&Value::Date(1_700_000_000_000)));
    }

    #[test]
    fn dollar_dollar_date_needs_to_be_alone() {
        // An object with $$date plus other keys is not a date
        let line = r#"{"$$date": 5, "x": 1}"#;
        let v = deserialize(line).unwrap();
        assert!(matches!(v, Value::Object(_)));
        assert_eq!(v.get("$$date"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn rejects_bad_keys_but_allows_sentinels() {
        let bad = doc(serde_json::json!({"$set": {"a": 1}}));
        assert!(serialize(&bad).is_err());

        let tombstone = doc(serde_json::json!({"_id": "k", "$$deleted": true}));
        assert!(serialize(&tombstone).is_ok());

        let index_def = doc(serde_json::json!({
            "$$indexCreated": {"fieldName": "x", "unique": true, "sparse": false}
        }));
        assert!(serialize(&index_def).is_ok());
    }

    #[test]
    fn integral_numbers_have_no_fraction() {
        let v = doc(serde_json::json!({"_id": "a", "n": 5.0}));
        let line = serialize(&v).unwrap();
        assert!(line.contains("\"n\":5"));
        assert!(!line.contains("5.0"));
    }

    #[test]
    fn non_finite_numbers_become_null() {
        let mut v = doc(serde_json::json!({"_id": "a"}));
        v.set("n", Value::Number(f64::INFINITY));
        let line = serialize(&v).unwrap();
        assert_eq!(deserialize(&line).unwrap().get("n"), Some(&Value::Null));
    }

    // Strategy over serializable documents (finite numbers, valid keys).
    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            (-1.0e12f64..1.0e12).prop_map(Value::Number),
            "[a-z]{0,8}".prop_map(Value::String),
            (-4_102_444_800_000i64..4_102_444_800_000).prop_map(Value::Date),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec(("[a-z][a-z0-9]{0,6}", inner), 0..4).prop_map(|pairs| {
                    let mut seen = std::collections::HashSet::new();
                    Value::Object(
                        pairs
                            .into_iter()
                            .filter(|(k, _)| seen.insert(k.clone()))
                            .collect(),
                    )
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn serialize_deserialize_round_trips(v in value_strategy()) {
            let line = serialize(&v).unwrap();
            let back = deserialize(&line).unwrap();
            // NaN-free by construction, so equality is reflexive here
            prop_assert_eq!(back, v);
        }
    }
}
