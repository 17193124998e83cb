//! Datafile persistence: append log, load-time replay, compaction.

use crate::error::{DbError, DbResult};
use crate::index::IndexOptions;
use crate::options::SerializationHook;
use foliodb_codec::{deserialize, serialize, Value};
use foliodb_storage::{FileBackend, StorageBackend};
use std::collections::HashMap;
use std::path::Path;

/// Default tolerated fraction of unparseable datafile lines.
pub const DEFAULT_CORRUPT_ALERT_THRESHOLD: f64 = 0.1;

/// Number of random round-trips used to vet a serialization hook pair.
const HOOK_VALIDATION_ROUNDS: usize = 300;

/// The state folded out of a datafile.
#[derive(Debug, Default)]
pub struct LoadedState {
    /// Surviving documents, in first-seen order.
    pub docs: Vec<Value>,
    /// Index definitions accumulated from the log.
    pub index_defs: Vec<IndexOptions>,
}

/// Owns the datafile and the line transforms around it.
pub struct Persistence {
    backend: Option<Box<dyn StorageBackend>>,
    after_serialization: Option<SerializationHook>,
    before_deserialization: Option<SerializationHook>,
    corrupt_alert_threshold: f64,
}

impl Persistence {
    /// Creates the persistence layer for a datastore.
    ///
    /// Refuses a filename ending in `~`, a one-sided hook pair, and a
    /// hook pair that is not bijective (vetted on random strings).
    pub fn open(
        filename: Option<&Path>,
        in_memory_only: bool,
        after_serialization: Option<SerializationHook>,
        before_deserialization: Option<SerializationHook>,
        corrupt_alert_threshold: Option<f64>,
    ) -> DbResult<Self> {
        validate_hooks(
            after_serialization.as_ref(),
            before_deserialization.as_ref(),
        )?;

        let backend = match filename {
            Some(path) if !in_memory_only => {
                if path.to_string_lossy().ends_with('~') {
                    return Err(DbError::BadFilename);
                }
                Some(Box::new(FileBackend::open(path)?) as Box<dyn StorageBackend>)
            }
            _ => None,
        };

        Ok(Self {
            backend,
            after_serialization,
            before_deserialization,
            corrupt_alert_threshold: corrupt_alert_threshold
                .unwrap_or(DEFAULT_CORRUPT_ALERT_THRESHOLD)
                .clamp(0.0, 1.0),
        })
    }

    /// Test constructor over an arbitrary backend.
    #[cfg(test)]
    pub(crate) fn with_backend(
        backend: Box<dyn StorageBackend>,
        after_serialization: Option<SerializationHook>,
        before_deserialization: Option<SerializationHook>,
        corrupt_alert_threshold: Option<f64>,
    ) -> DbResult<Self> {
        validate_hooks(
            after_serialization.as_ref(),
            before_deserialization.as_ref(),
        )?;
        Ok(Self {
            backend: Some(backend),
            after_serialization,
            before_deserialization,
            corrupt_alert_threshold: corrupt_alert_threshold
                .unwrap_or(DEFAULT_CORRUPT_ALERT_THRESHOLD)
                .clamp(0.0, 1.0),
        })
    }

    /// Whether this datastore never touches disk.
    pub fn is_in_memory(&self) -> bool {
        self.backend.is_none()
    }

    /// Appends one serialized line per record, durably, in one write.
    pub fn persist_new_state(&mut self, records: &[Value]) -> DbResult<()> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };

        let mut to_persist = String::new();
        for record in records {
            let line = serialize(record)?;
            let line = match &self.after_serialization {
                Some(hook) => hook(&line),
                None => line,
            };
            to_persist.push_str(&line);
            to_persist.push('\n');
        }
        if to_persist.is_empty() {
            return Ok(());
        }
        backend.append(to_persist.as_bytes())?;
        Ok(())
    }

    /// Reads the datafile and folds it into its logical state.
    ///
    /// Later records win per `_id`, tombstones delete, index definition
    /// records accumulate. Lines that fail to parse count as corrupt;
    /// past the tolerated fraction the whole load fails.
    pub fn load(&mut self) -> DbResult<LoadedState> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(LoadedState::default());
        };

        backend.ensure_integrity()?;
        let raw = backend.read_all()?;

        let mut lines: Vec<&str> = raw.split('\n').collect();
        // The datafile conventionally ends with a newline; the empty
        // final line is not data and does not count as corruption.
        if lines.last() == Some(&"") {
            lines.pop();
        }

        let mut corrupt = 0usize;
        let mut slots: Vec<Option<Value>> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        let mut index_defs: Vec<IndexOptions> = Vec::new();

        for line in &lines {
            let line = match &self.before_deserialization {
                Some(hook) => hook(line),
                None => (*line).to_string(),
            };
            let record = match deserialize(&line) {
                Ok(record) => record,
                Err(_) => {
                    corrupt += 1;
                    continue;
                }
            };

            if let Some(def) = record.get("$$indexCreated") {
                if let Some(options) = parse_index_def(def) {
                    index_defs.retain(|d| d.field_name != options.field_name);
                    index_defs.push(options);
                }
            } else if let Some(removed) = record.get("$$indexRemoved") {
                if let Some(name) = removed.as_str() {
                    index_defs.retain(|d| d.field_name != name);
                }
            } else if let Some(id) = record.get("_id").and_then(Value::as_str) {
                let id = id.to_string();
                if record.get("$$deleted").and_then(Value::as_bool) == Some(true) {
                    if let Some(slot) = by_id.remove(&id) {
                        slots[slot] = None;
                    }
                } else if let Some(&slot) = by_id.get(&id) {
                    slots[slot] = Some(record);
                } else {
                    by_id.insert(id, slots.len());
                    slots.push(Some(record));
                }
            }
        }

        let total = lines.len();
        if total > 0 && corrupt as f64 / total as f64 > self.corrupt_alert_threshold {
            return Err(DbError::Corrupted { corrupt, total });
        }
        if corrupt > 0 {
            tracing::warn!(corrupt, total, "tolerated corrupt datafile lines at load");
        }

        let docs: Vec<Value> = slots.into_iter().flatten().collect();
        tracing::debug!(
            docs = docs.len(),
            indexes = index_defs.len(),
            lines = total,
            "datafile loaded"
        );
        Ok(LoadedState { docs, index_defs })
    }

    /// Rewrites the datafile to exactly the given state, crash-safely.
    pub fn persist_cached_database<'a, D>(
        &mut self,
        docs: D,
        index_defs: &[IndexOptions],
    ) -> DbResult<()>
    where
        D: IntoIterator<Item = &'a Value>,
    {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };

        let mut to_persist = String::new();
        let mut push_line = |record: &Value, hook: &Option<SerializationHook>| -> DbResult<()> {
            let line = serialize(record)?;
            let line = match hook {
                Some(hook) => hook(&line),
                None => line,
            };
            to_persist.push_str(&line);
            to_persist.push('\n');
            Ok(())
        };

        for doc in docs {
            push_line(doc, &self.after_serialization)?;
        }
        for def in index_defs {
            push_line(&index_def_record(def), &self.after_serialization)?;
        }

        backend.rewrite(to_persist.as_bytes())?;
        tracing::debug!(bytes = to_persist.len(), "datafile compacted");
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("in_memory", &self.is_in_memory())
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .finish_non_exhaustive()
    }
}

/// Builds the `$$indexCreated` wire record for an index definition.
pub(crate) fn index_def_record(options: &IndexOptions) -> Value {
    let mut def = Value::Object(Vec::new());
    def.set("fieldName", Value::String(options.field_name.clone()));
    def.set("unique", Value::Bool(options.unique));
    def.set("sparse", Value::Bool(options.sparse));
    if let Some(seconds) = options.expire_after_seconds {
        def.set("expireAfterSeconds", Value::Number(seconds));
    }
    let mut record = Value::Object(Vec::new());
    record.set("$$indexCreated", def);
    record
}

/// Builds the `$$indexRemoved` wire record.
pub(crate) fn index_removed_record(field_name: &str) -> Value {
    let mut record = Value::Object(Vec::new());
    record.set("$$indexRemoved", Value::String(field_name.to_string()));
    record
}

/// Builds the tombstone record for a deleted document.
pub(crate) fn tombstone_record(id: &str) -> Value {
    let mut record = Value::Object(Vec::new());
    record.set("_id", Value::String(id.to_string()));
    record.set("$$deleted", Value::Bool(true));
    record
}

fn parse_index_def(def: &Value) -> Option<IndexOptions> {
    let field_name = def.get("fieldName")?.as_str()?;
    let mut options = IndexOptions::new(field_name);
    options.unique = def.get("unique").and_then(Value::as_bool).unwrap_or(false);
    options.sparse = def.get("sparse").and_then(Value::as_bool).unwrap_or(false);
    options.expire_after_seconds = def.get("expireAfterSeconds").and_then(Value::as_number);
    Some(options)
}

fn validate_hooks(
    after: Option<&SerializationHook>,
    before: Option<&SerializationHook>,
) -> DbResult<()> {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    let (after, before) = match (after, before) {
        (None, None) => return Ok(()),
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(DbError::bad_hooks(
                "serialization hook used but deserialization hook undefined, \
                 cautiously refusing to start",
            ))
        }
    };

    let mut rng = rand::thread_rng();
    for _ in 0..HOOK_VALIDATION_ROUNDS {
        let len = rng.gen_range(1..=100);
        let sample: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(len)
            .map(char::from)
            .collect();
        if before(&after(&sample)) != sample {
            return Err(DbError::bad_hooks(
                "beforeDeserialization is not the reverse of afterSerialization, \
                 cautiously refusing to start",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use foliodb_storage::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    fn plain(backend: Box<dyn StorageBackend>) -> Persistence {
        Persistence::with_backend(backend, None, None, None).unwrap()
    }

    #[test]
    fn append_then_load_round_trips() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        p.persist_new_state(&[v(json!({"_id": "a", "n": 1})), v(json!({"_id": "b", "n": 2}))])
            .unwrap();

        let state = p.load().unwrap();
        assert_eq!(state.docs.len(), 2);
        assert_eq!(state.docs[0].get("_id"), Some(&Value::from("a")));
    }

    #[test]
    fn later_records_override_earlier_ones() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        p.persist_new_state(&[v(json!({"_id": "a", "n": 1}))]).unwrap();
        p.persist_new_state(&[v(json!({"_id": "a", "n": 2}))]).unwrap();

        let state = p.load().unwrap();
        assert_eq!(state.docs.len(), 1);
        assert_eq!(state.docs[0].get("n"), Some(&Value::from(2)));
    }

    #[test]
    fn tombstones_delete() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        p.persist_new_state(&[v(json!({"_id": "a", "n": 1}))]).unwrap();
        p.persist_new_state(&[tombstone_record("a")]).unwrap();

        let state = p.load().unwrap();
        assert!(state.docs.is_empty());
    }

    #[test]
    fn index_definitions_fold() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        let def = IndexOptions::new("x").unique();
        p.persist_new_state(&[index_def_record(&def)]).unwrap();

        let state = p.load().unwrap();
        assert_eq!(state.index_defs.len(), 1);
        assert_eq!(state.index_defs[0].field_name, "x");
        assert!(state.index_defs[0].unique);
        assert!(!state.index_defs[0].sparse);

        p.persist_new_state(&[index_removed_record("x")]).unwrap();
        let state = p.load().unwrap();
        assert!(state.index_defs.is_empty());
    }

    #[test]
    fn ttl_definition_survives_the_log() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        let def = IndexOptions::new("expires").expire_after_seconds(60.0);
        p.persist_new_state(&[index_def_record(&def)]).unwrap();

        let state = p.load().unwrap();
        assert_eq!(state.index_defs[0].expire_after_seconds, Some(60.0));
    }

    #[test]
    fn corruption_below_threshold_is_tolerated() {
        let backend = MemoryBackend::with_data(
            b"{\"_id\":\"a\"}\n{\"_id\":\"b\"}\ngarbage\n{\"_id\":\"c\"}\n{\"_id\":\"d\"}\n\
              {\"_id\":\"e\"}\n{\"_id\":\"f\"}\n{\"_id\":\"g\"}\n{\"_id\":\"h\"}\n{\"_id\":\"i\"}\n\
              {\"_id\":\"j\"}\n"
                .to_vec(),
        );
        // 1 corrupt line out of 11 is under the default 0.1
        let mut p = plain(Box::new(backend));
        let state = p.load().unwrap();
        assert_eq!(state.docs.len(), 10);
    }

    #[test]
    fn corruption_above_threshold_fails_the_load() {
        let backend = MemoryBackend::with_data(b"{\"_id\":\"a\"}\nnot json at all\n".to_vec());
        let mut p = plain(Box::new(backend));
        let err = p.load();
        assert!(matches!(err, Err(DbError::Corrupted { corrupt: 1, total: 2 })));
    }

    #[test]
    fn threshold_zero_rejects_any_corruption() {
        let backend =
            MemoryBackend::with_data(b"{\"_id\":\"a\"}\n{\"_id\":\"b\"}\nbad\n".to_vec());
        let mut p =
            Persistence::with_backend(Box::new(backend), None, None, Some(0.0)).unwrap();
        assert!(p.load().is_err());
    }

    #[test]
    fn empty_file_loads_empty() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        let state = p.load().unwrap();
        assert!(state.docs.is_empty());
        assert!(state.index_defs.is_empty());
    }

    #[test]
    fn one_sided_hook_is_refused() {
        let hook: SerializationHook = Arc::new(|s: &str| s.to_string());
        let err = Persistence::with_backend(
            Box::new(MemoryBackend::new()),
            Some(hook),
            None,
            None,
        );
        assert!(matches!(err, Err(DbError::BadHooks { .. })));
    }

    #[test]
    fn non_inverse_hooks_are_refused() {
        let after: SerializationHook = Arc::new(|s: &str| format!("{s}!"));
        let before: SerializationHook = Arc::new(|s: &str| s.to_string());
        let err = Persistence::with_backend(
            Box::new(MemoryBackend::new()),
            Some(after),
            Some(before),
            None,
        );
        assert!(matches!(err, Err(DbError::BadHooks { .. })));
    }

    #[test]
    fn inverse_hooks_round_trip_the_datafile() {
        // A toy reversible transform standing in for encryption
        let after: SerializationHook =
            Arc::new(|s: &str| s.chars().rev().collect::<String>());
        let before: SerializationHook =
            Arc::new(|s: &str| s.chars().rev().collect::<String>());

        let mut p = Persistence::with_backend(
            Box::new(MemoryBackend::new()),
            Some(after),
            Some(before),
            None,
        )
        .unwrap();

        p.persist_new_state(&[v(json!({"_id": "a", "n": 1}))]).unwrap();
        let state = p.load().unwrap();
        assert_eq!(state.docs[0].get("n"), Some(&Value::from(1)));
    }

    #[test]
    fn hooked_file_without_hooks_reads_as_corrupt() {
        let after: SerializationHook =
            Arc::new(|s: &str| s.chars().rev().collect::<String>());
        let before: SerializationHook =
            Arc::new(|s: &str| s.chars().rev().collect::<String>());

        let mut hooked = Persistence::with_backend(
            Box::new(MemoryBackend::new()),
            Some(after),
            Some(before),
            None,
        )
        .unwrap();
        hooked.persist_new_state(&[v(json!({"_id": "a"}))]).unwrap();

        // Re-read the same bytes without the hook pair
        let raw = match hooked.backend.as_mut() {
            Some(backend) => backend.read_all().unwrap(),
            None => unreachable!(),
        };
        let mut bare = plain(Box::new(MemoryBackend::with_data(raw.into_bytes())));
        assert!(bare.load().is_err());
    }

    #[test]
    fn bad_filename_is_refused() {
        let err = Persistence::open(Some(Path::new("data.db~")), false, None, None, None);
        assert!(matches!(err, Err(DbError::BadFilename)));
    }

    #[test]
    fn compaction_collapses_history() {
        let mut p = plain(Box::new(MemoryBackend::new()));
        p.persist_new_state(&[v(json!({"_id": "a", "n": 1}))]).unwrap();
        p.persist_new_state(&[v(json!({"_id": "a", "n": 2}))]).unwrap();
        p.persist_new_state(&[tombstone_record("zzz")]).unwrap();

        let docs = vec![v(json!({"_id": "a", "n": 2}))];
        let defs = vec![IndexOptions::new("n")];
        p.persist_cached_database(docs.iter(), &defs).unwrap();

        let state = p.load().unwrap();
        assert_eq!(state.docs.len(), 1);
        assert_eq!(state.docs[0].get("n"), Some(&Value::from(2)));
        assert_eq!(state.index_defs.len(), 1);
    }

    #[test]
    fn in_memory_mode_is_a_no_op() {
        let mut p = Persistence::open(None, false, None, None, None).unwrap();
        assert!(p.is_in_memory());
        p.persist_new_state(&[v(json!({"_id": "a"}))]).unwrap();
        let state = p.load().unwrap();
        assert!(state.docs.is_empty());
    }
}
