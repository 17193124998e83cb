//! Dot-notation path access.

use crate::value::Value;

/// Resolves a dot-notation path against a value.
///
/// If the current value is an array and the next segment parses as a
/// non-negative integer, the segment indexes into the array. Otherwise
/// the remaining path is mapped across all elements and the resolved
/// values are collected into an array (elements where the path is
/// missing are dropped). Returns `None` when the path does not resolve.
pub fn get_dot_value(value: &Value, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    resolve(value, &parts)
}

fn resolve(value: &Value, parts: &[&str]) -> Option<Value> {
    let Some((first, rest)) = parts.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Array(items) => {
            if let Ok(i) = first.parse::<usize>() {
                items.get(i).and_then(|el| resolve(el, rest))
            } else {
                Some(Value::Array(
                    items.iter().filter_map(|el| resolve(el, parts)).collect(),
                ))
            }
        }
        Value::Object(_) => value.get(first).and_then(|child| resolve(child, rest)),
        _ => None,
    }
}
