//! Query matching.

use crate::error::{DbError, DbResult};
use foliodb_codec::{get_dot_value, values_equal, Value};
use std::cmp::Ordering;

/// Operators that apply to the array itself rather than its elements.
const ARRAY_COMPARISON_OPS: [&str; 2] = ["$size", "$elemMatch"];

/// Evaluates a data selector against a document.
///
/// Top-level keys are either logical operators (`$and`, `$or`, `$not`)
/// or field matches resolved through dot notation. When either side is
/// a primitive the whole comparison degrades to plain equality.
pub fn match_query(doc: &Value, query: &Value) -> DbResult<bool> {
    match (doc, query) {
        (Value::Object(_), Value::Object(pairs)) => {
            for (key, sub) in pairs {
                if key.starts_with('$') {
                    if !match_logical(doc, key, sub)? {
                        return Ok(false);
                    }
                } else if !match_part(doc, key, sub)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        // Anything that is not an object is compared as a plain value;
        // this is how $pull and $elemMatch recurse over array elements.
        _ => match_part_value(Some(doc), query, false),
    }
}

fn match_logical(doc: &Value, op: &str, arg: &Value) -> DbResult<bool> {
    match op {
        "$and" => {
            let subs = arg
                .as_array()
                .ok_or_else(|| DbError::bad_query("$and operator used without an array"))?;
            for sub in subs {
                if !match_query(doc, sub)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "$or" => {
            let subs = arg
                .as_array()
                .ok_or_else(|| DbError::bad_query("$or operator used without an array"))?;
            for sub in subs {
                if match_query(doc, sub)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        "$not" => Ok(!match_query(doc, arg)?),
        "$where" => Err(DbError::bad_query(
            "$where must be supplied as a predicate on the query, not inside the selector",
        )),
        other => Err(DbError::bad_query(format!(
            "unknown logical operator {other}"
        ))),
    }
}

/// Matches one field of the query against the document.
fn match_part(doc: &Value, key: &str, query_value: &Value) -> DbResult<bool> {
    match_part_value(get_dot_value(doc, key).as_ref(), query_value, false)
}

fn match_part_value(
    doc_value: Option<&Value>,
    query_value: &Value,
    treat_array_as_value: bool,
) -> DbResult<bool> {
    if let (Some(Value::Array(elements)), false) = (doc_value, treat_array_as_value) {
        // An array query value means exact comparison against the array
        if matches!(query_value, Value::Array(_)) {
            return match_part_value(doc_value, query_value, true);
        }
        // Array-specific operators also target the array itself
        if let Value::Object(pairs) = query_value {
            if pairs.iter().any(|(k, _)| ARRAY_COMPARISON_OPS.contains(&k.as_str())) {
                return match_part_value(doc_value, query_value, true);
            }
        }
        // Implicit any-of: one matching element suffices
        for element in elements {
            if match_part_value(Some(element), query_value, false)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }

    if let Value::Object(pairs) = query_value {
        let dollar_keys = pairs.iter().filter(|(k, _)| k.starts_with('$')).count();
        if dollar_keys != 0 && dollar_keys != pairs.len() {
            return Err(DbError::bad_query(
                "you cannot mix operators and normal fields",
            ));
        }
        if dollar_keys > 0 {
            for (op, arg) in pairs {
                if !match_comparison(op, doc_value, arg)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }
    }

    Ok(values_equal(doc_value, Some(query_value)))
}

fn match_comparison(op: &str, doc_value: Option<&Value>, arg: &Value) -> DbResult<bool> {
    match op {
        "$lt" => Ok(ordered_cmp(doc_value, arg) == Some(Ordering::Less)),
        "$lte" => Ok(matches!(
            ordered_cmp(doc_value, arg),
            Some(Ordering::Less | Ordering::Equal)
        )),
        "$gt" => Ok(ordered_cmp(doc_value, arg) == Some(Ordering::Greater)),
        "$gte" => Ok(matches!(
            ordered_cmp(doc_value, arg),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        "$ne" => Ok(!values_equal(doc_value, Some(arg))),
        "$in" => {
            let choices = arg
                .as_array()
                .ok_or_else(|| DbError::bad_query("$in operator called with a non-array"))?;
            Ok(choices.iter().any(|c| values_equal(doc_value, Some(c))))
        }
        "$nin" => {
            let choices = arg
                .as_array()
                .ok_or_else(|| DbError::bad_query("$nin operator called with a non-array"))?;
            Ok(!choices.iter().any(|c| values_equal(doc_value, Some(c))))
        }
        "$regex" => {
            let pattern = arg
                .as_str()
                .ok_or_else(|| DbError::bad_query("$regex operator called with a non-string"))?;
            let re = regex::Regex::new(pattern)
                .map_err(|e| DbError::bad_query(format!("invalid $regex pattern: {e}")))?;
            Ok(doc_value.and_then(Value::as_str).is_some_and(|s| re.is_match(s)))
        }
        "$exists" => {
            let must_exist = is_truthy(arg);
            Ok(doc_value.is_some() == must_exist)
        }
        "$size" => {
            let Some(Value::Array(elements)) = doc_value else {
                return Ok(false);
            };
            let n = arg
                .as_number()
                .filter(|n| n.fract() == 0.0 && *n >= 0.0)
                .ok_or_else(|| {
                    DbError::bad_query("$size operator called without a non-negative integer")
                })?;
            Ok(elements.len() as f64 == n)
        }
        "$elemMatch" => {
            let Some(Value::Array(elements)) = doc_value else {
                return Ok(false);
            };
            for element in elements {
                if match_query(element, arg)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(DbError::bad_query(format!(
            "unknown comparison function {other}"
        ))),
    }
}

/// Ordering for the comparison operators: only same-type numbers,
/// strings and dates are comparable, and NaN compares with nothing.
fn ordered_cmp(a: Option<&Value>, b: &Value) -> Option<Ordering> {
    match (a?, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        Value::Date(_) | Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn matches(doc: serde_json::Value, query: serde_json::Value) -> bool {
        match_query(&v(doc), &v(query)).unwrap()
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(matches(json!({"a": 1}), json!({})));
    }

    #[test]
    fn simple_equality() {
        assert!(matches(json!({"a": 1, "b": "x"}), json!({"a": 1})));
        assert!(!matches(json!({"a": 1}), json!({"a": 2})));
        assert!(!matches(json!({"a": 1}), json!({"missing": 1})));
    }

    #[test]
    fn dot_notation_match() {
        let doc = json!({"a": {"b": {"c": 3}}});
        assert!(matches(doc.clone(), json!({"a.b.c": 3})));
        assert!(!matches(doc, json!({"a.b.c": 4})));
    }

    #[test]
    fn null_matching() {
        assert!(matches(json!({"a": null}), json!({"a": null})));
        // A missing field is undefined, not null
        assert!(!matches(json!({"b": 1}), json!({"a": null})));
    }

    #[test]
    fn comparison_operators() {
        assert!(matches(json!({"n": 5}), json!({"n": {"$lt": 6}})));
        assert!(matches(json!({"n": 5}), json!({"n": {"$lte": 5}})));
        assert!(!matches(json!({"n": 5}), json!({"n": {"$gt": 5}})));
        assert!(matches(json!({"n": 5}), json!({"n": {"$gte": 5, "$lt": 10}})));
        assert!(matches(json!({"s": "abc"}), json!({"s": {"$gt": "abb"}})));
    }

    #[test]
    fn comparisons_across_types_never_match() {
        assert!(!matches(json!({"n": "5"}), json!({"n": {"$lt": 6}})));
        assert!(!matches(json!({"n": null}), json!({"n": {"$lt": 6}})));
        assert!(!matches(json!({}), json!({"n": {"$lt": 6}})));
    }

    #[test]
    fn nan_satisfies_no_comparison() {
        let mut doc = v(json!({}));
        doc.set("n", Value::Number(f64::NAN));
        for op in ["$lt", "$lte", "$gt", "$gte"] {
            let q = v(json!({"n": {op: 0}}));
            assert!(!match_query(&doc, &q).unwrap(), "{op} matched NaN");
        }
    }

    #[test]
    fn ne_of_missing_field_is_true() {
        assert!(matches(json!({"b": 1}), json!({"a": {"$ne": 3}})));
        assert!(matches(json!({"a": 2}), json!({"a": {"$ne": 3}})));
        assert!(!matches(json!({"a": 3}), json!({"a": {"$ne": 3}})));
    }

    #[test]
    fn in_and_nin() {
        assert!(matches(json!({"a": 2}), json!({"a": {"$in": [1, 2, 3]}})));
        assert!(!matches(json!({"a": 4}), json!({"a": {"$in": [1, 2, 3]}})));
        assert!(matches(json!({"a": 4}), json!({"a": {"$nin": [1, 2, 3]}})));
        // Missing field is not in any list
        assert!(matches(json!({}), json!({"a": {"$nin": [1]}})));

        let err = match_query(&v(json!({"a": 1})), &v(json!({"a": {"$in": 5}})));
        assert!(err.is_err());
    }

    #[test]
    fn regex_match() {
        assert!(matches(json!({"s": "hello"}), json!({"s": {"$regex": "^hel"}})));
        assert!(!matches(json!({"s": "hello"}), json!({"s": {"$regex": "^world"}})));
        // Non-string values never match a regex
        assert!(!matches(json!({"s": 12}), json!({"s": {"$regex": "1"}})));
    }

    #[test]
    fn exists() {
        assert!(matches(json!({"a": null}), json!({"a": {"$exists": true}})));
        assert!(!matches(json!({}), json!({"a": {"$exists": true}})));
        assert!(matches(json!({}), json!({"a": {"$exists": false}})));
        // Truthiness of the operand decides the direction
        assert!(matches(json!({}), json!({"a": {"$exists": 0}})));
        assert!(matches(json!({"a": 1}), json!({"a": {"$exists": "yes"}})));
    }

    #[test]
    fn implicit_any_of_on_arrays() {
        let doc = json!({"a": [1, 2, 3]});
        assert!(matches(doc.clone(), json!({"a": 2})));
        assert!(!matches(doc.clone(), json!({"a": 5})));
        assert!(matches(doc, json!({"a": {"$gt": 2}})));
    }

    #[test]
    fn array_query_value_means_exact_match() {
        let doc = json!({"a": [1, 2]});
        assert!(matches(doc.clone(), json!({"a": [1, 2]})));
        assert!(!matches(doc.clone(), json!({"a": [1]})));
        assert!(!matches(doc, json!({"a": [2, 1]})));
    }

    #[test]
    fn size_operator() {
        let doc = json!({"a": [1, 2, 3]});
        assert!(matches(doc.clone(), json!({"a": {"$size": 3}})));
        assert!(!matches(doc.clone(), json!({"a": {"$size": 2}})));
        assert!(!matches(json!({"a": 5}), json!({"a": {"$size": 1}})));

        let err = match_query(&v(doc), &v(json!({"a": {"$size": 1.5}})));
        assert!(err.is_err());
    }

    #[test]
    fn elem_match() {
        let doc = json!({"pts": [{"x": 1, "y": 2}, {"x": 3, "y": 4}]});
        assert!(matches(doc.clone(), json!({"pts": {"$elemMatch": {"x": 3, "y": 4}}})));
        assert!(!matches(doc, json!({"pts": {"$elemMatch": {"x": 1, "y": 4}}})));
    }

    #[test]
    fn nested_path_across_array_elements() {
        let doc = json!({"items": [{"name": "pen"}, {"name": "ink"}]});
        assert!(matches(doc.clone(), json!({"items.name": "ink"})));
        assert!(!matches(doc.clone(), json!({"items.name": "paper"})));
        assert!(matches(doc, json!({"items.0.name": "pen"})));
    }

    #[test]
    fn logical_operators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(matches(doc.clone(), json!({"$and": [{"a": 1}, {"b": 2}]})));
        assert!(!matches(doc.clone(), json!({"$and": [{"a": 1}, {"b": 3}]})));
        assert!(matches(doc.clone(), json!({"$or": [{"a": 9}, {"b": 2}]})));
        assert!(!matches(doc.clone(), json!({"$or": [{"a": 9}, {"b": 9}]})));
        assert!(matches(doc.clone(), json!({"$not": {"a": 9}})));

        assert!(match_query(&v(doc), &v(json!({"$and": {"a": 1}}))).is_err());
    }

    #[test]
    fn mixing_operators_and_fields_is_rejected() {
        let res = match_query(&v(json!({"a": 1})), &v(json!({"a": {"$gt": 0, "b": 2}})));
        assert!(res.is_err());
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let res = match_query(&v(json!({"a": 1})), &v(json!({"a": {"$foo": 1}})));
        assert!(res.is_err());
        let res = match_query(&v(json!({"a": 1})), &v(json!({"$xor": [{"a": 1}]})));
        assert!(res.is_err());
    }

    #[test]
    fn object_equality_is_structural() {
        let doc = json!({"a": {"x": 1, "y": 2}});
        assert!(matches(doc.clone(), json!({"a": {"y": 2, "x": 1}})));
        assert!(!matches(doc, json!({"a": {"x": 1}})));
    }

    #[test]
    fn where_predicate_via_query() {
        use crate::query::Query;
        use std::sync::Arc;

        let query = Query::from(json!({"a": {"$gt": 0}}))
            .with_where(Arc::new(|doc: &Value| {
                doc.get("a").and_then(Value::as_number).is_some_and(|n| n % 2.0 == 0.0)
            }));
        assert!(query.matches(&v(json!({"a": 2}))).unwrap());
        assert!(!query.matches(&v(json!({"a": 3}))).unwrap());
        assert!(!query.matches(&v(json!({"a": -2}))).unwrap());
    }

    #[test]
    fn where_inside_selector_is_rejected() {
        let res = match_query(&v(json!({"a": 1})), &v(json!({"$where": true})));
        assert!(res.is_err());
    }

    #[test]
    fn date_equality_and_comparison() {
        let mut doc = v(json!({}));
        doc.set("at", Value::Date(1_000));
        let mut q = v(json!({}));
        q.set("at", Value::Date(1_000));
        assert!(match_query(&doc, &q).unwrap());

        let mut range = v(json!({}));
        let mut bound = v(json!({}));
        bound.set("$gt", Value::Date(500));
        range.set("at", bound);
        assert!(match_query(&doc, &range).unwrap());
    }
}
