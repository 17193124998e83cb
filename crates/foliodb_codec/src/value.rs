//! Dynamic document value type.

use std::cmp::Ordering;
use std::sync::Arc;

/// A caller-supplied string comparator, honored by `sort` only.
pub type CompareStrings = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// A dynamic document value.
///
/// This type represents any value FolioDB can store: the scalar types,
/// millisecond-epoch dates, arrays, and objects. Objects preserve key
/// insertion order so that serialized files stay reproducible.
///
/// The sole numeric type is the 64-bit float, mirroring JSON.
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit floating point number.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Date as milliseconds since the Unix epoch.
    Date(i64),
    /// Array of values.
    Array(Vec<Value>),
    /// Object with string keys, in insertion order.
    Object(Vec<(String, Value)>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // IEEE-754: NaN != NaN
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            // Structural, insensitive to key order
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(bk, bv)| bk == k && bv == v)
                    })
            }
            _ => false,
        }
    }
}

impl Value {
    /// Creates an object value from key-value pairs, keeping their order.
    pub fn object(pairs: Vec<(String, Value)>) -> Self {
        Value::Object(pairs)
    }

    /// Returns the type name, mostly for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A primitive is anything that is not an array or an object.
    ///
    /// Index candidate selection only considers primitive query values.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as epoch milliseconds, if it is a date.
    pub fn as_date(&self) -> Option<i64> {
        match self {
            Value::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a mutable array, if it is one.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as an object, if it is one.
    pub fn as_object(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Get this value as a mutable object, if it is one.
    pub fn as_object_mut(&mut self) -> Option<&mut Vec<(String, Value)>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Look up a key in this object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Look up a key mutably in this object value.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Value::Object(pairs) => pairs.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Sets a key on this object value, replacing in place or appending.
    ///
    /// No-op on non-objects.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Value::Object(pairs) = self {
            if let Some(slot) = pairs.iter_mut().find(|(k, _)| k == key) {
                slot.1 = value;
            } else {
                pairs.push((key.to_string(), value));
            }
        }
    }

    /// Removes a key from this object value, returning the old value.
    pub fn remove_key(&mut self, key: &str) -> Option<Value> {
        if let Value::Object(pairs) = self {
            if let Some(pos) = pairs.iter().position(|(k, _)| k == key) {
                return Some(pairs.remove(pos).1);
            }
        }
        None
    }

    /// Total ordering against another value (both present).
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        compare_values(Some(self), Some(other))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Rank of a value in the heterogeneous type precedence.
///
/// `None` stands for a missing (undefined) value, which sorts lowest.
fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Bool(_)) => 4,
        Some(Value::Date(_)) => 5,
        Some(Value::Array(_)) => 6,
        Some(Value::Object(_)) => 7,
    }
}

/// Total ordering over possibly-missing values with the default string
/// comparator.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    compare_values_with(a, b, None)
}

/// Total ordering over possibly-missing values.
///
/// Type precedence, lowest to highest: undefined, null, numbers,
/// strings, booleans, dates, arrays, objects. Within numbers the IEEE
/// total order is used so the ordering stays total even with NaN keys.
/// `compare_strings` overrides the code-unit string comparison; it is
/// only passed in from `sort`.
pub fn compare_values_with(
    a: Option<&Value>,
    b: Option<&Value>,
    compare_strings: Option<&CompareStrings>,
) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (None, None) | (Some(Value::Null), Some(Value::Null)) => Ordering::Equal,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.total_cmp(y),
        (Some(Value::String(x)), Some(Value::String(y))) => match compare_strings {
            Some(f) => f(x, y),
            None => x.cmp(y),
        },
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Date(x)), Some(Value::Date(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (xe, ye) in x.iter().zip(y.iter()) {
                let ord = compare_values_with(Some(xe), Some(ye), compare_strings);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            // Compare values at sorted key positions, then key count.
            let mut xk: Vec<&str> = x.iter().map(|(k, _)| k.as_str()).collect();
            let mut yk: Vec<&str> = y.iter().map(|(k, _)| k.as_str()).collect();
            xk.sort_unstable();
            yk.sort_unstable();
            for (kx, ky) in xk.iter().zip(yk.iter()) {
                let vx = x.iter().find(|(k, _)| k == kx).map(|(_, v)| v);
                let vy = y.iter().find(|(k, _)| k == ky).map(|(_, v)| v);
                let ord = compare_values_with(vx, vy, compare_strings);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            xk.len().cmp(&yk.len())
        }
        _ => Ordering::Equal,
    }
}

/// Equality over possibly-missing values.
///
/// A missing value is never equal to anything, including another
/// missing value. Everything else is structural `Value` equality.
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn type_precedence() {
        let ordered = vec![
            Value::Null,
            Value::Number(1e9),
            Value::String("z".into()),
            Value::Bool(false),
            Value::Date(0),
            Value::Array(vec![]),
            obj(vec![]),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(pair[0].cmp_order(&pair[1]), Ordering::Less);
        }
        // Missing sorts below everything
        assert_eq!(
            compare_values(None, Some(&Value::Null)),
            Ordering::Less
        );
    }

    #[test]
    fn number_ordering() {
        assert_eq!(
            Value::Number(1.0).cmp_order(&Value::Number(2.0)),
            Ordering::Less
        );
        assert_eq!(
            Value::Number(-0.5).cmp_order(&Value::Number(-0.5)),
            Ordering::Equal
        );
    }

    #[test]
    fn array_ordering_shorter_is_smaller() {
        let a = Value::from(vec![1, 2]);
        let b = Value::from(vec![1, 2, 3]);
        assert_eq!(a.cmp_order(&b), Ordering::Less);

        let c = Value::from(vec![1, 3]);
        assert_eq!(a.cmp_order(&c), Ordering::Less);
    }

    #[test]
    fn custom_string_comparator() {
        let ci: CompareStrings =
            Arc::new(|a, b| a.to_lowercase().cmp(&b.to_lowercase()));
        let a = Value::from("Apple");
        let b = Value::from("banana");
        // Default code-unit ordering puts uppercase first
        assert_eq!(a.cmp_order(&b), Ordering::Less);
        assert_eq!(
            compare_values_with(Some(&Value::from("Banana")), Some(&Value::from("apple")), Some(&ci)),
            Ordering::Greater
        );
    }

    #[test]
    fn nan_never_equal() {
        let nan = Value::Number(f64::NAN);
        assert_ne!(nan, Value::Number(f64::NAN));
        assert!(!values_equal(Some(&nan), Some(&nan)));
    }

    #[test]
    fn undefined_never_equal() {
        assert!(!values_equal(None, None));
        assert!(!values_equal(None, Some(&Value::Null)));
    }

    #[test]
    fn object_equality_ignores_key_order() {
        let a = obj(vec![("x", Value::from(1)), ("y", Value::from(2))]);
        let b = obj(vec![("y", Value::from(2)), ("x", Value::from(1))]);
        assert_eq!(a, b);
    }

    #[test]
    fn date_and_number_are_distinct() {
        assert_ne!(Value::Date(5), Value::Number(5.0));
        assert_eq!(Value::Date(5), Value::Date(5));
    }

    #[test]
    fn object_set_preserves_insertion_order() {
        let mut o = obj(vec![("b", Value::from(1))]);
        o.set("a", Value::from(2));
        o.set("b", Value::from(3));
        let pairs = o.as_object().unwrap();
        assert_eq!(pairs[0].0, "b");
        assert_eq!(pairs[1].0, "a");
        assert_eq!(o.get("b"), Some(&Value::from(3)));
    }

    #[test]
    fn from_json_value() {
        let v = Value::from(serde_json::json!({"a": 1, "b": [true, null]}));
        assert_eq!(v.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(
            v.get("b"),
            Some(&Value::Array(vec![Value::Bool(true), Value::Null]))
        );
    }
}
