//! Update modifiers.

use crate::error::{DbError, DbResult};
use crate::query::matcher::match_query;
use foliodb_codec::{check_document, compare_values, Value};
use std::cmp::Ordering;

/// Applies an update query to a document and returns the new version.
///
/// An update without any `$` keys replaces the whole document. With
/// `$` keys, each modifier is applied in turn, walking dot notation
/// and auto-creating intermediate objects (except `$unset`). Either
/// way the `_id` cannot change and the result must pass field-name
/// validation.
pub fn modify(doc: &Value, update: &Value) -> DbResult<Value> {
    let pairs = update
        .as_object()
        .ok_or_else(|| DbError::bad_modifier("update query must be an object"))?;

    if let Some(new_id) = update.get("_id") {
        if !foliodb_codec::values_equal(Some(new_id), doc.get("_id")) {
            return Err(DbError::CannotChangeId);
        }
    }

    let dollar_keys = pairs.iter().filter(|(k, _)| k.starts_with('$')).count();
    if dollar_keys != 0 && dollar_keys != pairs.len() {
        return Err(DbError::bad_modifier(
            "you cannot mix modifiers and normal fields",
        ));
    }

    let mut new_doc;
    if dollar_keys == 0 {
        new_doc = update.clone();
        if let Some(id) = doc.get("_id") {
            new_doc.set("_id", id.clone());
        }
    } else {
        new_doc = doc.clone();
        for (modifier, arg) in pairs {
            let fields = arg.as_object().ok_or_else(|| {
                DbError::bad_modifier(format!("modifier {modifier}'s argument must be an object"))
            })?;
            for (field, value) in fields {
                apply_modifier(&mut new_doc, modifier, field, value)?;
            }
        }
    }

    check_document(&new_doc)?;
    match (new_doc.get("_id"), doc.get("_id")) {
        (None, None) => {}
        (a, b) if foliodb_codec::values_equal(a, b) => {}
        _ => return Err(DbError::CannotChangeId),
    }
    Ok(new_doc)
}

fn apply_modifier(doc: &mut Value, modifier: &str, field: &str, arg: &Value) -> DbResult<()> {
    let parts: Vec<&str> = field.split('.').collect();
    descend(doc, &parts, modifier, arg)
}

/// Walks the dot path, creating intermediate objects on the way.
/// `$unset` stops quietly wherever the path is missing.
fn descend(current: &mut Value, parts: &[&str], modifier: &str, arg: &Value) -> DbResult<()> {
    let head = parts[0];
    if parts.len() == 1 {
        return last_step(current, head, modifier, arg);
    }
    match current {
        Value::Array(items) => {
            let index: usize = head.parse().map_err(|_| {
                DbError::bad_modifier(format!(
                    "cannot use a non-numeric path segment {head} on an array"
                ))
            })?;
            match items.get_mut(index) {
                Some(element) => descend(element, &parts[1..], modifier, arg),
                None if modifier == "$unset" => Ok(()),
                None => Err(DbError::bad_modifier(format!(
                    "array index {index} out of bounds"
                ))),
            }
        }
        Value::Object(_) => {
            if current.get(head).is_none() {
                if modifier == "$unset" {
                    return Ok(());
                }
                current.set(head, Value::Object(Vec::new()));
            }
            match current.get_mut(head) {
                Some(child) => descend(child, &parts[1..], modifier, arg),
                None => Err(DbError::bad_modifier("failed to create intermediate field")),
            }
        }
        _ => {
            if modifier == "$unset" {
                Ok(())
            } else {
                Err(DbError::bad_modifier(format!(
                    "cannot walk path through a {}",
                    current.type_name()
                )))
            }
        }
    }
}

fn last_step(parent: &mut Value, key: &str, modifier: &str, arg: &Value) -> DbResult<()> {
    match modifier {
        "$set" => set_value(parent, key, arg.clone()),
        "$unset" => {
            match parent {
                Value::Object(_) => {
                    parent.remove_key(key);
                }
                Value::Array(items) => {
                    // Removing an array slot leaves a hole, not a shorter array
                    if let Ok(i) = key.parse::<usize>() {
                        if let Some(slot) = items.get_mut(i) {
                            *slot = Value::Null;
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        }
        "$inc" => {
            let delta = arg
                .as_number()
                .ok_or_else(|| DbError::bad_modifier("$inc must be followed by a number"))?;
            let new_value = match field_of(parent, key) {
                None => delta,
                Some(Value::Number(n)) => *n + delta,
                Some(_) => {
                    return Err(DbError::bad_modifier(
                        "don't use the $inc modifier on non-number fields",
                    ))
                }
            };
            set_value(parent, key, Value::Number(new_value))
        }
        "$min" | "$max" => {
            let keep_smaller = modifier == "$min";
            let replace = match field_of(parent, key) {
                None => true,
                Some(current) => {
                    let ord = compare_values(Some(arg), Some(current));
                    if keep_smaller {
                        ord == Ordering::Less
                    } else {
                        ord == Ordering::Greater
                    }
                }
            };
            if replace {
                set_value(parent, key, arg.clone())?;
            }
            Ok(())
        }
        "$push" => push(parent, key, arg),
        "$addToSet" => add_to_set(parent, key, arg),
        "$pop" => {
            let target = field_of_mut(parent, key);
            let Some(Value::Array(items)) = target else {
                return Err(DbError::bad_modifier(
                    "can't $pop an element from non-array values",
                ));
            };
            let n = arg
                .as_number()
                .filter(|n| n.fract() == 0.0)
                .ok_or_else(|| DbError::bad_modifier("$pop expects an integer"))?;
            if n > 0.0 {
                items.pop();
            } else if n < 0.0 && !items.is_empty() {
                items.remove(0);
            }
            Ok(())
        }
        "$pull" => {
            let target = field_of_mut(parent, key);
            let Some(Value::Array(items)) = target else {
                return Err(DbError::bad_modifier(
                    "can't $pull an element from non-array values",
                ));
            };
            let mut kept = Vec::with_capacity(items.len());
            for element in items.drain(..) {
                if !match_query(&element, arg)? {
                    kept.push(element);
                }
            }
            *items = kept;
            Ok(())
        }
        other => Err(DbError::bad_modifier(format!("unknown modifier {other}"))),
    }
}

fn push(parent: &mut Value, key: &str, arg: &Value) -> DbResult<()> {
    if field_of(parent, key).is_none() {
        set_value(parent, key, Value::Array(Vec::new()))?;
    }
    let Some(Value::Array(items)) = field_of_mut(parent, key) else {
        return Err(DbError::bad_modifier(
            "can't $push an element on non-array values",
        ));
    };

    if let Some(each) = arg.get("$each") {
        let extras: Vec<&str> = arg
            .as_object()
            .into_iter()
            .flatten()
            .map(|(k, _)| k.as_str())
            .filter(|k| *k != "$each" && *k != "$slice")
            .collect();
        if !extras.is_empty() {
            return Err(DbError::bad_modifier(
                "can only use $slice in conjunction with $each when $push to array",
            ));
        }
        let elements = each
            .as_array()
            .ok_or_else(|| DbError::bad_modifier("$each requires an array value"))?;
        items.extend(elements.iter().cloned());

        if let Some(slice) = arg.get("$slice") {
            let n = slice
                .as_number()
                .filter(|n| n.fract() == 0.0)
                .ok_or_else(|| DbError::bad_modifier("$slice requires an integer"))?;
            if n == 0.0 {
                items.clear();
            } else if n > 0.0 {
                items.truncate(n as usize);
            } else {
                let keep = (-n) as usize;
                if items.len() > keep {
                    let drop = items.len() - keep;
                    items.drain(..drop);
                }
            }
        }
    } else if arg.get("$slice").is_some() {
        return Err(DbError::bad_modifier(
            "$slice can only be used in conjunction with $each",
        ));
    } else {
        items.push(arg.clone());
    }
    Ok(())
}

fn add_to_set(parent: &mut Value, key: &str, arg: &Value) -> DbResult<()> {
    if field_of(parent, key).is_none() {
        set_value(parent, key, Value::Array(Vec::new()))?;
    }
    let Some(Value::Array(items)) = field_of_mut(parent, key) else {
        return Err(DbError::bad_modifier(
            "can't $addToSet an element on non-array values",
        ));
    };

    if let Some(each) = arg.get("$each") {
        if arg.as_object().map_or(0, |pairs| pairs.len()) > 1 {
            return Err(DbError::bad_modifier(
                "can't use another field in conjunction with $each",
            ));
        }
        let elements = each
            .as_array()
            .ok_or_else(|| DbError::bad_modifier("$each requires an array value"))?;
        for element in elements {
            if !items.iter().any(|existing| existing == element) {
                items.push(element.clone());
            }
        }
    } else if !items.iter().any(|existing| existing == arg) {
        items.push(arg.clone());
    }
    Ok(())
}

/// Reads a field from an object parent or an array parent by index.
fn field_of<'a>(parent: &'a Value, key: &str) -> Option<&'a Value> {
    match parent {
        Value::Object(_) => parent.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn field_of_mut<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match parent {
        Value::Object(_) => parent.get_mut(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

fn set_value(parent: &mut Value, key: &str, value: Value) -> DbResult<()> {
    match parent {
        Value::Object(_) => {
            parent.set(key, value);
            Ok(())
        }
        Value::Array(items) => {
            let index: usize = key.parse().map_err(|_| {
                DbError::bad_modifier(format!(
                    "cannot use a non-numeric path segment {key} on an array"
                ))
            })?;
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            items[index] = value;
            Ok(())
        }
        other => Err(DbError::bad_modifier(format!(
            "cannot set a field on a {}",
            other.type_name()
        ))),
    }
}
