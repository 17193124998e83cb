//! Result projection.

use crate::error::{DbError, DbResult};
use crate::query::modifier::modify;
use foliodb_codec::{get_dot_value, Value};

/// Applies a projection to a result set.
///
/// A projection object is either all-1 (keep listed fields) or all-0
/// (omit listed fields); `_id` is controllable independently and kept
/// by default. An empty projection returns documents untouched.
pub fn project(docs: Vec<Value>, projection: &Value) -> DbResult<Vec<Value>> {
    let Some(pairs) = projection.as_object() else {
        return Ok(docs);
    };
    if pairs.is_empty() {
        return Ok(docs);
    }

    let keep_id = !matches!(projection.get("_id"), Some(Value::Number(n)) if *n == 0.0);
    let keys: Vec<&str> = pairs
        .iter()
        .map(|(k, _)| k.as_str())
        .filter(|k| *k != "_id")
        .collect();

    let mut action: Option<bool> = None;
    for key in &keys {
        let keep = match projection.get(key) {
            Some(Value::Number(n)) if *n == 1.0 => true,
            Some(Value::Number(n)) if *n == 0.0 => false,
            _ => {
                return Err(DbError::bad_projection(
                    "projection values must be 0 or 1",
                ))
            }
        };
        if let Some(previous) = action {
            if previous != keep {
                return Err(DbError::bad_projection(
                    "can't both keep and omit fields except for _id",
                ));
            }
        }
        action = Some(keep);
    }

    let mut projected = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut out = match action {
            // Pick: rebuild from an empty document, one $set per path
            Some(true) => {
                let mut set_arg = Value::Object(Vec::new());
                for key in &keys {
                    if let Some(value) = get_dot_value(&doc, key) {
                        set_arg.set(key, value);
                    }
                }
                let mut update = Value::Object(Vec::new());
                update.set("$set", set_arg);
                modify(&Value::Object(Vec::new()), &update)?
            }
            // Omit: strip listed paths from a copy
            Some(false) => {
                let mut unset_arg = Value::Object(Vec::new());
                for key in &keys {
                    unset_arg.set(key, Value::Bool(true));
                }
                let mut update = Value::Object(Vec::new());
                update.set("$unset", unset_arg);
                modify(&doc, &update)?
            }
            // Only _id was mentioned
            None => doc.clone(),
        };

        if keep_id {
            if let Some(id) = doc.get("_id") {
                out.set("_id", id.clone());
            }
        } else {
            out.remove_key("_id");
        }
        projected.push(out);
    }
    Ok(projected)
}
