//! Document key rules and strict copying.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Returns whether a field name is acceptable in a stored document.
///
/// Field names must not contain `.` and must not begin with `$`.
pub fn is_valid_key(key: &str) -> bool {
    !key.starts_with('$') && !key.contains('.')
}

/// Validates every field name in a document, recursively.
pub fn check_document(value: &Value) -> CodecResult<()> {
    match value {
        Value::Object(pairs) => {
            for (key, child) in pairs {
                if !is_valid_key(key) {
                    return Err(CodecError::bad_key(key));
                }
                check_document(child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_document(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Deep copy that drops object keys beginning with `$` or containing `.`.
///
/// Used to materialize an upsert base from a query and to sanitize
/// values before they become documents.
pub fn strict_copy(value: &Value) -> Value {
    match value {
        Value::Object(pairs) => Value::Object(
            pairs
                .iter()
                .filter(|(k, _)| is_valid_key(k))
                .map(|(k, v)| (k.clone(), strict_copy(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strict_copy).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dollar_and_dot_keys() {
        let bad = Value::from(serde_json::json!({"$set": 1}));
        assert!(check_document(&bad).is_err());

        let nested = Value::from(serde_json::json!({"a": {"b.c": 1}}));
        assert!(check_document(&nested).is_err());

        let inside_array = Value::from(serde_json::json!({"a": [{"$x": 1}]}));
        assert!(check_document(&inside_array).is_err());
    }

    #[test]
    fn accepts_plain_documents() {
        let good = Value::from(serde_json::json!({"a": {"b": [1, 2]}, "c": null}));
        assert!(check_document(&good).is_ok());
    }

    #[test]
    fn strict_copy_drops_operator_keys() {
        let v = Value::from(serde_json::json!({"a": 1, "$gt": 2, "b": {"c.d": 3, "e": 4}}));
        let copy = strict_copy(&v);
        assert_eq!(copy.get("a"), Some(&Value::from(1)));
        assert_eq!(copy.get("$gt"), None);
        assert_eq!(copy.get("b").unwrap().get("e"), Some(&Value::from(4)));
        assert_eq!(copy.get("b").unwrap().as_object().unwrap().len(), 1);
    }
}
