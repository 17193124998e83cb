//! Ordered field indexes.
//!
//! An index projects one field of every document onto an ordered tree;
//! each tree node holds the set of documents sharing that key.
//! Documents are shared across indexes by reference-counted handle, so
//! membership tests are pointer identity, not structural comparison.

use crate::error::{DbError, DbResult};
use foliodb_codec::{compare_values, get_dot_value, serialize, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Shared handle to an indexed document.
pub type SharedDoc = Arc<Value>;

/// Index definition: the projected field plus its flags.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Dot-notation field the index is built over.
    pub field_name: String,
    /// At most one document per key.
    pub unique: bool,
    /// Skip documents where the field is missing.
    pub sparse: bool,
    /// Expire documents this many seconds after the field's date value.
    pub expire_after_seconds: Option<f64>,
}

impl IndexOptions {
    /// Creates options for a plain index over `field_name`.
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            unique: false,
            sparse: false,
            expire_after_seconds: None,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes the index sparse.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Declares a TTL on the indexed date field.
    #[must_use]
    pub fn expire_after_seconds(mut self, seconds: f64) -> Self {
        self.expire_after_seconds = Some(seconds);
        self
    }
}

/// Tree key: the projected value, `None` when the field is missing.
///
/// Wraps the heterogeneous total order so the standard B-tree can hold
/// keys of mixed types. Missing keys sort below everything else.
#[derive(Debug, Clone)]
struct IndexKey(Option<Value>);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(self.0.as_ref(), other.0.as_ref())
    }
}

/// One ordered index over a document set.
pub struct Index {
    options: IndexOptions,
    tree: BTreeMap<IndexKey, Vec<SharedDoc>>,
}

impl Index {
    /// Creates an empty index.
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            tree: BTreeMap::new(),
        }
    }

    /// The index definition.
    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The indexed field name.
    pub fn field_name(&self) -> &str {
        &self.options.field_name
    }

    /// Empties the index.
    pub fn reset(&mut self) {
        self.tree.clear();
    }

    /// Projects the indexed field out of a document.
    fn key_of(&self, doc: &Value) -> Option<Value> {
        get_dot_value(doc, &self.options.field_name)
    }

    /// Inserts a document.
    ///
    /// An array-valued key inserts the document once per distinct
    /// element; a failure on any element rolls the others back.
    pub fn insert(&mut self, doc: &SharedDoc) -> DbResult<()> {
        let key = self.key_of(doc);
        if key.is_none() && self.options.sparse {
            return Ok(());
        }

        if let Some(Value::Array(elements)) = &key {
            let elements = distinct_elements(elements);
            for (i, element) in elements.iter().enumerate() {
                if let Err(e) = self.insert_at(Some((*element).clone()), doc) {
                    for inserted in &elements[..i] {
                        self.remove_at(Some((*inserted).clone()), doc);
                    }
                    return Err(e);
                }
            }
            Ok(())
        } else {
            self.insert_at(key, doc)
        }
    }

    /// Inserts many documents; on failure none of them stays.
    pub fn insert_many(&mut self, docs: &[SharedDoc]) -> DbResult<()> {
        for (i, doc) in docs.iter().enumerate() {
            if let Err(e) = self.insert(doc) {
                for inserted in &docs[..i] {
                    self.remove(inserted);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn insert_at(&mut self, key: Option<Value>, doc: &SharedDoc) -> DbResult<()> {
        let index_key = IndexKey(key);
        if self.options.unique {
            if let Some(slot) = self.tree.get(&index_key) {
                if !slot.is_empty() {
                    return Err(DbError::unique_violation(
                        &self.options.field_name,
                        display_key(index_key.0.as_ref()),
                    ));
                }
            }
        }
        self.tree.entry(index_key).or_default().push(Arc::clone(doc));
        Ok(())
    }

    /// Removes a document. Removal cannot fail; absent documents are
    /// ignored.
    pub fn remove(&mut self, doc: &SharedDoc) {
        let key = self.key_of(doc);
        if key.is_none() && self.options.sparse {
            return;
        }
        if let Some(Value::Array(elements)) = &key {
            for element in distinct_elements(elements) {
                self.remove_at(Some(element.clone()), doc);
            }
        } else {
            self.remove_at(key, doc);
        }
    }

    fn remove_at(&mut self, key: Option<Value>, doc: &SharedDoc) {
        let index_key = IndexKey(key);
        if let Some(slot) = self.tree.get_mut(&index_key) {
            slot.retain(|d| !Arc::ptr_eq(d, doc));
            if slot.is_empty() {
                self.tree.remove(&index_key);
            }
        }
    }

    /// Replaces `old` with `new`, restoring `old` if the insert fails.
    pub fn update(&mut self, old: &SharedDoc, new: &SharedDoc) -> DbResult<()> {
        self.remove(old);
        if let Err(e) = self.insert(new) {
            // Reinsertion of the old version cannot conflict
            let _ = self.insert(old);
            return Err(e);
        }
        Ok(())
    }

    /// Replaces many documents atomically: all pairs or none.
    pub fn update_multiple(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> DbResult<()> {
        for (old, _) in pairs {
            self.remove(old);
        }
        for (i, (_, new)) in pairs.iter().enumerate() {
            if let Err(e) = self.insert(new) {
                for (_, inserted) in &pairs[..i] {
                    self.remove(inserted);
                }
                for (old, _) in pairs {
                    let _ = self.insert(old);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undoes an [`update`](Self::update).
    pub fn revert_update(&mut self, old: &SharedDoc, new: &SharedDoc) -> DbResult<()> {
        self.update(new, old)
    }

    /// Undoes an [`update_multiple`](Self::update_multiple).
    pub fn revert_update_multiple(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> DbResult<()> {
        for (_, new) in pairs {
            self.remove(new);
        }
        for (old, _) in pairs {
            self.insert(old)?;
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get_matching(&self, key: &Value) -> Vec<SharedDoc> {
        self.tree
            .get(&IndexKey(Some(key.clone())))
            .map(|slot| slot.to_vec())
            .unwrap_or_default()
    }

    /// Disjunctive lookup, deduplicated by `_id`, first hit wins.
    pub fn get_matching_many(&self, keys: &[Value]) -> Vec<SharedDoc> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for key in keys {
            for doc in self.get_matching(key) {
                let id = doc
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if seen.insert(id) {
                    out.push(doc);
                }
            }
        }
        out
    }

    /// Range lookup driven by `$lt` / `$lte` / `$gt` / `$gte` keys of
    /// `bounds`; unknown keys are ignored and a missing side is open.
    pub fn get_between_bounds(&self, bounds: &Value) -> Vec<SharedDoc> {
        use std::ops::Bound;

        let lower = match (bounds.get("$gt"), bounds.get("$gte")) {
            (Some(v), _) => Bound::Excluded(IndexKey(Some(v.clone()))),
            (None, Some(v)) => Bound::Included(IndexKey(Some(v.clone()))),
            (None, None) => Bound::Unbounded,
        };
        let upper = match (bounds.get("$lt"), bounds.get("$lte")) {
            (Some(v), _) => Bound::Excluded(IndexKey(Some(v.clone()))),
            (None, Some(v)) => Bound::Included(IndexKey(Some(v.clone()))),
            (None, None) => Bound::Unbounded,
        };

        // An inverted or degenerate range selects nothing (and would
        // panic the tree's range iterator)
        if let (
            Bound::Included(l) | Bound::Excluded(l),
            Bound::Included(u) | Bound::Excluded(u),
        ) = (&lower, &upper)
        {
            match l.cmp(u) {
                Ordering::Greater => return Vec::new(),
                Ordering::Equal
                    if matches!(lower, Bound::Excluded(_))
                        || matches!(upper, Bound::Excluded(_)) =>
                {
                    return Vec::new()
                }
                _ => {}
            }
        }

        self.tree
            .range((lower, upper))
            .flat_map(|(_, slot)| slot.iter().cloned())
            .collect()
    }

    /// All documents, in key order.
    pub fn get_all(&self) -> Vec<SharedDoc> {
        self.tree
            .values()
            .flat_map(|slot| slot.iter().cloned())
            .collect()
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("field_name", &self.options.field_name)
            .field("unique", &self.options.unique)
            .field("sparse", &self.options.sparse)
            .field("key_count", &self.key_count())
            .finish()
    }
}

/// Deduplicates array elements with a type-tagged projection, so that
/// `0`, `"0"` and `false` stay distinct keys.
fn distinct_elements(elements: &[Value]) -> Vec<&Value> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(elements.len());
    for element in elements {
        if seen.insert(unique_projection(element)) {
            out.push(element);
        }
    }
    out
}

fn unique_projection(v: &Value) -> String {
    match v {
        Value::Null => "$null".to_string(),
        Value::Bool(b) => format!("$boolean{b}"),
        Value::Number(n) => format!("$number{n}"),
        Value::String(s) => format!("$string{s}"),
        Value::Date(ms) => format!("$date{ms}"),
        Value::Array(_) => format!("$array{v:?}"),
        Value::Object(_) => format!("$object{v:?}"),
    }
}

/// Display form of an index key for error messages.
fn display_key(key: Option<&Value>) -> String {
    match key {
        None => "undefined".to_string(),
        Some(v) => serialize(v).unwrap_or_else(|_| format!("{v:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> SharedDoc {
        Arc::new(Value::from(j))
    }

    fn ids(docs: &[SharedDoc]) -> Vec<&str> {
        docs.iter()
            .map(|d| d.get("_id").and_then(Value::as_str).unwrap())
            .collect()
    }

    #[test]
    fn insert_and_lookup() {
        let mut index = Index::new(IndexOptions::new("name"));
        let d = doc(json!({"_id": "1", "name": "ada"}));
        index.insert(&d).unwrap();

        let found = index.get_matching(&Value::from("ada"));
        assert_eq!(ids(&found), ["1"]);
        assert!(index.get_matching(&Value::from("bob")).is_empty());
    }

    #[test]
    fn get_all_is_key_ordered() {
        let mut index = Index::new(IndexOptions::new("n"));
        for (id, n) in [("a", 3), ("b", 1), ("c", 2)] {
            index.insert(&doc(json!({"_id": id, "n": n}))).unwrap();
        }
        assert_eq!(ids(&index.get_all()), ["b", "c", "a"]);
    }

    #[test]
    fn missing_field_is_indexed_unless_sparse() {
        let mut plain = Index::new(IndexOptions::new("x"));
        let d = doc(json!({"_id": "1"}));
        plain.insert(&d).unwrap();
        assert_eq!(plain.get_all().len(), 1);

        let mut sparse = Index::new(IndexOptions::new("x").sparse());
        sparse.insert(&d).unwrap();
        assert_eq!(sparse.get_all().len(), 0);
    }

    #[test]
    fn unique_violation() {
        let mut index = Index::new(IndexOptions::new("email").unique());
        index
            .insert(&doc(json!({"_id": "1", "email": "a@b.c"})))
            .unwrap();
        let err = index.insert(&doc(json!({"_id": "2", "email": "a@b.c"})));
        assert!(matches!(err, Err(DbError::UniqueViolation { .. })));
        assert_eq!(index.get_all().len(), 1);
    }

    #[test]
    fn unique_applies_to_missing_keys_too() {
        let mut index = Index::new(IndexOptions::new("x").unique());
        index.insert(&doc(json!({"_id": "1"}))).unwrap();
        assert!(index.insert(&doc(json!({"_id": "2"}))).is_err());

        // Sparse uniqueness ignores missing keys
        let mut sparse = Index::new(IndexOptions::new("x").unique().sparse());
        sparse.insert(&doc(json!({"_id": "1"}))).unwrap();
        sparse.insert(&doc(json!({"_id": "2"}))).unwrap();
    }

    #[test]
    fn array_key_indexes_each_element() {
        let mut index = Index::new(IndexOptions::new("tags"));
        let d = doc(json!({"_id": "1", "tags": ["x", "y"]}));
        index.insert(&d).unwrap();

        assert_eq!(ids(&index.get_matching(&Value::from("x"))), ["1"]);
        assert_eq!(ids(&index.get_matching(&Value::from("y"))), ["1"]);

        index.remove(&d);
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn array_elements_deduplicate_by_type() {
        let mut index = Index::new(IndexOptions::new("mixed"));
        let d = doc(json!({"_id": "1", "mixed": [0, "0", false, 0]}));
        index.insert(&d).unwrap();
        // 0, "0" and false are three distinct keys; the repeated 0 is not
        assert_eq!(index.key_count(), 3);
    }

    #[test]
    fn array_unique_conflict_rolls_back_elements() {
        let mut index = Index::new(IndexOptions::new("tags").unique());
        index
            .insert(&doc(json!({"_id": "1", "tags": ["b"]})))
            .unwrap();
        let err = index.insert(&doc(json!({"_id": "2", "tags": ["a", "b"]})));
        assert!(err.is_err());
        // "a" must not linger after the failed insert
        assert!(index.get_matching(&Value::from("a")).is_empty());
        assert_eq!(ids(&index.get_matching(&Value::from("b"))), ["1"]);
    }

    #[test]
    fn insert_many_is_atomic() {
        let mut index = Index::new(IndexOptions::new("n").unique());
        let batch = [
            doc(json!({"_id": "1", "n": 1})),
            doc(json!({"_id": "2", "n": 2})),
            doc(json!({"_id": "3", "n": 1})),
        ];
        assert!(index.insert_many(&batch).is_err());
        assert_eq!(index.get_all().len(), 0);
    }

    #[test]
    fn update_and_revert() {
        let mut index = Index::new(IndexOptions::new("n"));
        let old = doc(json!({"_id": "1", "n": 1}));
        let new = doc(json!({"_id": "1", "n": 9}));
        index.insert(&old).unwrap();

        index.update(&old, &new).unwrap();
        assert!(index.get_matching(&Value::from(1)).is_empty());
        assert_eq!(index.get_matching(&Value::from(9)).len(), 1);

        index.revert_update(&old, &new).unwrap();
        assert_eq!(index.get_matching(&Value::from(1)).len(), 1);
    }

    #[test]
    fn update_failure_restores_old_doc() {
        let mut index = Index::new(IndexOptions::new("n").unique());
        let a = doc(json!({"_id": "1", "n": 1}));
        let b = doc(json!({"_id": "2", "n": 2}));
        index.insert(&a).unwrap();
        index.insert(&b).unwrap();

        let b_clash = doc(json!({"_id": "2", "n": 1}));
        assert!(index.update(&b, &b_clash).is_err());
        assert_eq!(index.get_matching(&Value::from(2)).len(), 1);
        assert_eq!(index.get_matching(&Value::from(1)).len(), 1);
    }

    #[test]
    fn update_multiple_rolls_back_fully() {
        let mut index = Index::new(IndexOptions::new("n").unique());
        let a = doc(json!({"_id": "1", "n": 1}));
        let b = doc(json!({"_id": "2", "n": 2}));
        index.insert(&a).unwrap();
        index.insert(&b).unwrap();

        // Second pair collides with the first pair's new key
        let pairs = vec![
            (Arc::clone(&a), doc(json!({"_id": "1", "n": 10}))),
            (Arc::clone(&b), doc(json!({"_id": "2", "n": 10}))),
        ];
        assert!(index.update_multiple(&pairs).is_err());
        assert_eq!(index.get_matching(&Value::from(1)).len(), 1);
        assert_eq!(index.get_matching(&Value::from(2)).len(), 1);
        assert!(index.get_matching(&Value::from(10)).is_empty());
    }

    #[test]
    fn get_matching_many_deduplicates() {
        let mut index = Index::new(IndexOptions::new("tags"));
        index
            .insert(&doc(json!({"_id": "1", "tags": ["x", "y"]})))
            .unwrap();
        let found = index.get_matching_many(&[Value::from("x"), Value::from("y")]);
        assert_eq!(ids(&found), ["1"]);
    }

    #[test]
    fn between_bounds() {
        let mut index = Index::new(IndexOptions::new("n"));
        for (id, n) in [("a", 1), ("b", 3), ("c", 5), ("d", 7)] {
            index.insert(&doc(json!({"_id": id, "n": n}))).unwrap();
        }

        let bounds = Value::from(json!({"$gt": 1, "$lte": 5}));
        assert_eq!(ids(&index.get_between_bounds(&bounds)), ["b", "c"]);

        let open_above = Value::from(json!({"$gte": 5}));
        assert_eq!(ids(&index.get_between_bounds(&open_above)), ["c", "d"]);
    }

    #[test]
    fn inverted_bounds_select_nothing() {
        let mut index = Index::new(IndexOptions::new("n"));
        for n in [1, 2, 3] {
            index.insert(&doc(json!({"_id": n.to_string(), "n": n}))).unwrap();
        }
        let inverted = Value::from(json!({"$gt": 5, "$lt": 3}));
        assert!(index.get_between_bounds(&inverted).is_empty());

        let empty_point = Value::from(json!({"$gt": 2, "$lt": 2}));
        assert!(index.get_between_bounds(&empty_point).is_empty());
    }
}
