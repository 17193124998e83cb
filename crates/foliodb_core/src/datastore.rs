//! The datastore: indexes, persistence and executor composed.

use crate::cursor::Cursor;
use crate::error::{DbError, DbResult};
use crate::events::Events;
use crate::executor::{Executor, Task};
use crate::index::{Index, IndexOptions, SharedDoc};
use crate::options::DatastoreOptions;
use crate::persistence::{index_def_record, index_removed_record, tombstone_record, Persistence};
use crate::query::modifier::modify;
use crate::query::projection::project;
use crate::query::Query;
use foliodb_codec::{
    check_document, compare_values_with, get_dot_value, strict_copy, CompareStrings, Value,
};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Comparison operators that make a query key usable for a range scan.
const RANGE_OPS: [&str; 4] = ["$lt", "$lte", "$gt", "$gte"];

/// Alphabet for generated document ids, URL-safe.
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Length of generated document ids.
const ID_LENGTH: usize = 16;

/// Floor for the autocompaction interval.
const MIN_AUTOCOMPACTION_INTERVAL: Duration = Duration::from_secs(5);

/// Options for [`Datastore::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first one.
    pub multi: bool,
    /// Insert a document built from the query and update when nothing
    /// matches.
    pub upsert: bool,
    /// Return the new document versions alongside the count.
    pub return_updated_docs: bool,
}

/// Options for [`Datastore::remove`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove every matching document instead of the first one.
    pub multi: bool,
}

/// Outcome of an update.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    /// Number of documents replaced or inserted.
    pub num_affected: usize,
    /// New document versions, when requested or upserted.
    pub affected_documents: Option<Vec<Value>>,
    /// Whether the operation inserted instead of updating.
    pub upsert: bool,
}

struct Autocompaction {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// An embedded, single-process document datastore.
///
/// Every operation runs on the executor's worker thread, one at a
/// time, in submission order; the calling thread blocks until its
/// operation has completed (and, for mutations on a persistent store,
/// until the append is durable).
///
/// A persistent datastore buffers operations until [`load_database`]
/// (or `autoload`) has run, so call it first.
///
/// [`load_database`]: Self::load_database
pub struct Datastore {
    inner: Arc<Mutex<Inner>>,
    executor: Arc<Executor>,
    events: Arc<Events>,
    autocompaction: Mutex<Option<Autocompaction>>,
}

impl Datastore {
    /// Opens a datastore.
    ///
    /// Configuration refusals (bad filename, unusable hook pair)
    /// surface here. With `autoload` the datafile is loaded before
    /// this returns.
    pub fn new(options: DatastoreOptions) -> DbResult<Self> {
        let persistence = Persistence::open(
            options.filename.as_deref(),
            options.in_memory_only,
            options.after_serialization.clone(),
            options.before_deserialization.clone(),
            options.corrupt_alert_threshold,
        )?;
        let in_memory = persistence.is_in_memory();
        let events = Arc::new(Events::new());

        let mut indexes = Vec::new();
        indexes.push((
            "_id".to_string(),
            Index::new(IndexOptions::new("_id").unique()),
        ));

        let store = Self {
            inner: Arc::new(Mutex::new(Inner {
                indexes,
                persistence,
                timestamp_data: options.timestamp_data,
                compare_strings: options.compare_strings.clone(),
                events: Arc::clone(&events),
            })),
            executor: Arc::new(Executor::new(in_memory)),
            events,
            autocompaction: Mutex::new(None),
        };

        if options.autoload {
            store.load_database()?;
        }
        Ok(store)
    }

    /// Convenience constructor for an in-memory datastore.
    pub fn in_memory() -> DbResult<Self> {
        Self::new(DatastoreOptions::new())
    }

    /// Loads (or reloads) the datafile, then releases buffered
    /// operations.
    pub fn load_database(&self) -> DbResult<()> {
        let executor = Arc::clone(&self.executor);
        self.run(true, move |inner| {
            inner.load_database()?;
            executor.process_buffer();
            Ok(())
        })
    }

    /// Inserts a document, returning the stored version (with its
    /// `_id` and timestamps filled in).
    pub fn insert(&self, doc: impl Into<Value>) -> DbResult<Value> {
        let doc = doc.into();
        let mut inserted = self.run(false, move |inner| inner.insert(vec![doc]))?;
        inserted.pop().ok_or(DbError::Stopped)
    }

    /// Inserts several documents atomically with respect to indexes.
    pub fn insert_many(&self, docs: Vec<Value>) -> DbResult<Vec<Value>> {
        self.run(false, move |inner| inner.insert(docs))
    }

    /// Starts a find query; refine and run it through the returned
    /// [`Cursor`].
    pub fn find(&self, query: impl Into<Query>) -> Cursor<'_> {
        Cursor::new(self, query.into())
    }

    /// Returns the first matching document, if any.
    pub fn find_one(&self, query: impl Into<Query>) -> DbResult<Option<Value>> {
        Ok(self.find(query).limit(1).exec()?.pop())
    }

    /// Counts matching documents.
    pub fn count(&self, query: impl Into<Query>) -> DbResult<usize> {
        self.find(query).count()
    }

    /// Updates matching documents, or upserts.
    pub fn update(
        &self,
        query: impl Into<Query>,
        update: impl Into<Value>,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        let query = query.into();
        let update = update.into();
        self.run(false, move |inner| inner.update(&query, &update, options))
    }

    /// Removes matching documents, returning how many went away.
    pub fn remove(&self, query: impl Into<Query>, options: RemoveOptions) -> DbResult<usize> {
        let query = query.into();
        self.run(false, move |inner| inner.remove(&query, options.multi))
    }

    /// Creates an index (a no-op when it already exists) and records
    /// it in the datafile.
    pub fn ensure_index(&self, options: IndexOptions) -> DbResult<()> {
        self.run(false, move |inner| inner.ensure_index(options))
    }

    /// Drops an index and records the removal in the datafile.
    pub fn remove_index(&self, field_name: &str) -> DbResult<()> {
        let field_name = field_name.to_string();
        self.run(false, move |inner| inner.remove_index(&field_name))
    }

    /// Rewrites the datafile to the current state.
    pub fn compact_datafile(&self) -> DbResult<()> {
        self.run(false, Inner::compact)
    }

    /// Schedules periodic compactions. Intervals below five seconds
    /// are clamped up.
    pub fn set_autocompaction_interval(&self, interval: Duration) {
        self.stop_autocompaction();
        let interval = interval.max(MIN_AUTOCOMPACTION_INTERVAL);

        let (stop, stop_rx) = channel::<()>();
        let executor = Arc::clone(&self.executor);
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    let inner = Arc::clone(&inner);
                    let task: Task = Box::new(move || {
                        if let Err(e) = inner.lock().compact() {
                            tracing::warn!(error = %e, "autocompaction failed");
                        }
                    });
                    executor.push(task);
                }
                _ => break,
            }
        });
        *self.autocompaction.lock() = Some(Autocompaction { stop, handle });
    }

    /// Cancels periodic compactions.
    pub fn stop_autocompaction(&self) {
        if let Some(ac) = self.autocompaction.lock().take() {
            let _ = ac.stop.send(());
            let _ = ac.handle.join();
        }
    }

    /// Registers a listener for the `compaction.done` event.
    ///
    /// The listener runs on the executor thread, so it must not invoke
    /// datastore operations and wait for their results.
    pub fn on_compaction_done(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.events.on_compaction_done(Box::new(listener));
    }

    /// Runs a closure on the executor and blocks for its result.
    pub(crate) fn run<R, F>(&self, force: bool, f: F) -> DbResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Inner) -> DbResult<R> + Send + 'static,
    {
        let (tx, rx) = channel();
        let inner = Arc::clone(&self.inner);
        let task: Task = Box::new(move || {
            let result = f(&mut inner.lock());
            let _ = tx.send(result);
        });
        if force {
            self.executor.push_force(task);
        } else {
            self.executor.push(task);
        }
        rx.recv().map_err(|_| DbError::Stopped)?
    }
}

impl Drop for Datastore {
    fn drop(&mut self) {
        self.stop_autocompaction();
    }
}

impl std::fmt::Debug for Datastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datastore")
            .field("ready", &self.executor.is_ready())
            .finish_non_exhaustive()
    }
}

/// Find execution parameters gathered by a cursor.
#[derive(Debug, Default, Clone)]
pub(crate) struct FindSpec {
    pub limit: Option<usize>,
    pub skip: usize,
    pub sort: Option<Value>,
    pub projection: Option<Value>,
}

/// Mutable state, only ever touched from executor tasks.
pub(crate) struct Inner {
    /// All indexes in creation order; `_id` is always first.
    indexes: Vec<(String, Index)>,
    persistence: Persistence,
    timestamp_data: bool,
    compare_strings: Option<CompareStrings>,
    events: Arc<Events>,
}

impl Inner {
    fn index(&self, name: &str) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, index)| index)
    }

    /// All documents, ordered by `_id`.
    fn get_all_data(&self) -> Vec<SharedDoc> {
        self.index("_id").map(Index::get_all).unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Load and compaction
    // ------------------------------------------------------------------

    fn load_database(&mut self) -> DbResult<()> {
        for (_, index) in &mut self.indexes {
            index.reset();
        }

        let state = self.persistence.load()?;

        for def in state.index_defs {
            let name = def.field_name.clone();
            let index = Index::new(def);
            if let Some(slot) = self.indexes.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = index;
            } else {
                self.indexes.push((name, index));
            }
        }

        let docs: Vec<SharedDoc> = state.docs.into_iter().map(Arc::new).collect();
        for i in 0..self.indexes.len() {
            if let Err(e) = self.indexes[i].1.insert_many(&docs) {
                for (_, index) in &mut self.indexes {
                    index.reset();
                }
                return Err(e);
            }
        }

        // Collapse the log right away so the file reflects current state
        self.compact()
    }

    fn compact(&mut self) -> DbResult<()> {
        let docs = self.get_all_data();
        let defs: Vec<IndexOptions> = self
            .indexes
            .iter()
            .filter(|(name, _)| name != "_id")
            .map(|(_, index)| index.options().clone())
            .collect();
        self.persistence
            .persist_cached_database(docs.iter().map(AsRef::as_ref), &defs)?;
        if !self.persistence.is_in_memory() {
            self.events.emit_compaction_done();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Index maintenance
    // ------------------------------------------------------------------

    fn add_to_indexes(&mut self, doc: &SharedDoc) -> DbResult<()> {
        let mut failure = None;
        for (i, (_, index)) in self.indexes.iter_mut().enumerate() {
            if let Err(e) = index.insert(doc) {
                failure = Some((i, e));
                break;
            }
        }
        if let Some((failed, e)) = failure {
            for (_, index) in &mut self.indexes[..failed] {
                index.remove(doc);
            }
            return Err(e);
        }
        Ok(())
    }

    fn add_many_to_indexes(&mut self, docs: &[SharedDoc]) -> DbResult<()> {
        for (i, doc) in docs.iter().enumerate() {
            if let Err(e) = self.add_to_indexes(doc) {
                for inserted in &docs[..i] {
                    self.remove_from_indexes(inserted);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn remove_from_indexes(&mut self, doc: &SharedDoc) {
        for (_, index) in &mut self.indexes {
            index.remove(doc);
        }
    }

    fn update_indexes(&mut self, pairs: &[(SharedDoc, SharedDoc)]) -> DbResult<()> {
        let mut failure = None;
        for (i, (_, index)) in self.indexes.iter_mut().enumerate() {
            if let Err(e) = index.update_multiple(pairs) {
                failure = Some((i, e));
                break;
            }
        }
        if let Some((failed, e)) = failure {
            for (_, index) in &mut self.indexes[..failed] {
                let _ = index.revert_update_multiple(pairs);
            }
            return Err(e);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Candidate selection
    // ------------------------------------------------------------------

    /// Picks the cheapest candidate set an index can provide: point
    /// lookup, then `$in`, then range, then a full scan.
    fn candidates_from_indexes(&self, selector: &Value) -> Vec<SharedDoc> {
        let Some(pairs) = selector.as_object() else {
            return self.get_all_data();
        };

        for (key, value) in pairs {
            if value.is_primitive() {
                if let Some(index) = self.index(key) {
                    return index.get_matching(value);
                }
            }
        }

        for (key, value) in pairs {
            if let Some(choices) = value.get("$in") {
                if let Some(index) = self.index(key) {
                    return match choices.as_array() {
                        Some(choices) => index.get_matching_many(choices),
                        // A malformed $in still errors in the matcher;
                        // hand it the point lookup superset
                        None => index.get_matching(choices),
                    };
                }
            }
        }

        for (key, value) in pairs {
            let is_range = value
                .as_object()
                .is_some_and(|ops| ops.iter().any(|(op, _)| RANGE_OPS.contains(&op.as_str())));
            if is_range {
                if let Some(index) = self.index(key) {
                    return index.get_between_bounds(value);
                }
            }
        }

        self.get_all_data()
    }

    /// Candidate selection plus TTL eviction.
    ///
    /// Expired documents go through the normal remove path (tombstone
    /// and all); `dont_expire` skips that for remove itself.
    fn get_candidates(&mut self, query: &Query, dont_expire: bool) -> DbResult<Vec<SharedDoc>> {
        let docs = self.candidates_from_indexes(query.selector());
        if dont_expire {
            return Ok(docs);
        }

        let ttl: Vec<(String, f64)> = self
            .indexes
            .iter()
            .filter_map(|(name, index)| {
                index
                    .options()
                    .expire_after_seconds
                    .map(|secs| (name.clone(), secs))
            })
            .collect();
        if ttl.is_empty() {
            return Ok(docs);
        }

        let now = now_millis();
        let mut valid = Vec::with_capacity(docs.len());
        let mut expired_ids = Vec::new();
        for doc in docs {
            let alive = ttl.iter().all(|(field, secs)| match doc.get(field) {
                Some(Value::Date(ms)) => now <= ms + (secs * 1000.0) as i64,
                _ => true,
            });
            if alive {
                valid.push(doc);
            } else if let Some(id) = doc.get("_id").and_then(Value::as_str) {
                expired_ids.push(id.to_string());
            }
        }

        for id in expired_ids {
            tracing::debug!(%id, "evicting expired document");
            let mut selector = Value::Object(Vec::new());
            selector.set("_id", Value::String(id));
            self.remove(&Query::new(selector), false)?;
        }
        Ok(valid)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    fn create_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (0..ID_LENGTH)
                .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
                .collect();
            let taken = self
                .index("_id")
                .is_some_and(|index| !index.get_matching(&Value::String(id.clone())).is_empty());
            if !taken {
                return id;
            }
        }
    }

    fn prepare_document_for_insertion(&self, doc: &Value) -> DbResult<Value> {
        if !matches!(doc, Value::Object(_)) {
            return Err(DbError::bad_query("only objects can be inserted"));
        }
        let mut prepared = doc.clone();
        match prepared.get("_id") {
            None => prepared.set("_id", Value::String(self.create_id())),
            Some(Value::String(_)) => {}
            Some(other) => {
                return Err(DbError::bad_query(format!(
                    "_id must be a string, got a {}",
                    other.type_name()
                )))
            }
        }
        if self.timestamp_data {
            let now = Value::Date(now_millis());
            if prepared.get("createdAt").is_none() {
                prepared.set("createdAt", now.clone());
            }
            if prepared.get("updatedAt").is_none() {
                prepared.set("updatedAt", now);
            }
        }
        check_document(&prepared)?;
        Ok(prepared)
    }

    pub(crate) fn insert(&mut self, docs: Vec<Value>) -> DbResult<Vec<Value>> {
        let mut prepared = Vec::with_capacity(docs.len());
        for doc in &docs {
            prepared.push(Arc::new(self.prepare_document_for_insertion(doc)?));
        }

        if let [doc] = prepared.as_slice() {
            let doc = Arc::clone(doc);
            self.add_to_indexes(&doc)?;
        } else {
            self.add_many_to_indexes(&prepared)?;
        }

        let records: Vec<Value> = prepared.iter().map(|d| (**d).clone()).collect();
        self.persistence.persist_new_state(&records)?;
        Ok(records)
    }

    pub(crate) fn update(
        &mut self,
        query: &Query,
        update: &Value,
        options: UpdateOptions,
    ) -> DbResult<UpdateResult> {
        if options.upsert {
            let existing = self.find(
                query,
                &FindSpec {
                    limit: Some(1),
                    ..FindSpec::default()
                },
            )?;
            if existing.is_empty() {
                // A plain document upserts as-is; a modifier set is
                // applied to a sanitized copy of the query.
                let to_insert = if check_document(update).is_ok() {
                    update.clone()
                } else {
                    modify(&strict_copy(query.selector()), update)?
                };
                let inserted = self.insert(vec![to_insert])?;
                return Ok(UpdateResult {
                    num_affected: 1,
                    affected_documents: Some(inserted),
                    upsert: true,
                });
            }
        }

        let candidates = self.get_candidates(query, false)?;
        let now = now_millis();
        let mut pairs: Vec<(SharedDoc, SharedDoc)> = Vec::new();

        for candidate in candidates {
            if query.matches(&candidate)? && (options.multi || pairs.is_empty()) {
                let mut modified = modify(&candidate, update)?;
                if self.timestamp_data {
                    if let Some(created) = candidate.get("createdAt") {
                        modified.set("createdAt", created.clone());
                    }
                    modified.set("updatedAt", Value::Date(now));
                }
                pairs.push((candidate, Arc::new(modified)));
            }
        }

        self.update_indexes(&pairs)?;

        let new_docs: Vec<Value> = pairs.iter().map(|(_, new)| (**new).clone()).collect();
        self.persistence.persist_new_state(&new_docs)?;

        Ok(UpdateResult {
            num_affected: pairs.len(),
            affected_documents: options.return_updated_docs.then_some(new_docs),
            upsert: false,
        })
    }

    pub(crate) fn remove(&mut self, query: &Query, multi: bool) -> DbResult<usize> {
        let candidates = self.get_candidates(query, true)?;
        let mut tombstones = Vec::new();
        let mut removed = Vec::new();

        for candidate in candidates {
            if query.matches(&candidate)? && (multi || removed.is_empty()) {
                if let Some(id) = candidate.get("_id").and_then(Value::as_str) {
                    tombstones.push(tombstone_record(id));
                }
                removed.push(candidate);
            }
        }

        for doc in &removed {
            self.remove_from_indexes(doc);
        }
        self.persistence.persist_new_state(&tombstones)?;
        Ok(removed.len())
    }

    pub(crate) fn ensure_index(&mut self, options: IndexOptions) -> DbResult<()> {
        if options.field_name.is_empty() {
            return Err(DbError::MissingFieldName);
        }
        if self.index(&options.field_name).is_some() {
            return Ok(());
        }

        let docs = self.get_all_data();
        let mut index = Index::new(options.clone());
        index.insert_many(&docs)?;
        self.indexes.push((options.field_name.clone(), index));

        self.persistence
            .persist_new_state(&[index_def_record(&options)])
    }

    pub(crate) fn remove_index(&mut self, field_name: &str) -> DbResult<()> {
        if field_name == "_id" {
            return Err(DbError::bad_query("the _id index cannot be removed"));
        }
        self.indexes.retain(|(name, _)| name != field_name);
        self.persistence
            .persist_new_state(&[index_removed_record(field_name)])
    }

    pub(crate) fn find(&mut self, query: &Query, spec: &FindSpec) -> DbResult<Vec<Value>> {
        let candidates = self.get_candidates(query, false)?;
        let mut hits: Vec<SharedDoc> = Vec::new();

        match sort_criteria(spec.sort.as_ref())? {
            Some(criteria) => {
                for candidate in candidates {
                    if query.matches(&candidate)? {
                        hits.push(candidate);
                    }
                }
                let compare_strings = self.compare_strings.as_ref();
                hits.sort_by(|a, b| {
                    for (key, direction) in &criteria {
                        let ord = compare_values_with(
                            get_dot_value(a, key).as_ref(),
                            get_dot_value(b, key).as_ref(),
                            compare_strings,
                        );
                        let ord = if *direction < 0 { ord.reverse() } else { ord };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                hits = hits
                    .into_iter()
                    .skip(spec.skip)
                    .take(spec.limit.unwrap_or(usize::MAX))
                    .collect();
            }
            None => {
                let mut skipped = 0;
                for candidate in candidates {
                    if query.matches(&candidate)? {
                        if skipped < spec.skip {
                            skipped += 1;
                            continue;
                        }
                        hits.push(candidate);
                        if spec.limit == Some(hits.len()) {
                            break;
                        }
                    }
                }
            }
        }

        // Callers receive copies, never handles into the indexes
        let copies: Vec<Value> = hits.iter().map(|doc| (**doc).clone()).collect();
        match &spec.projection {
            Some(projection) => project(copies, projection),
            None => Ok(copies),
        }
    }
}

/// Parses a `{field: 1 | -1, ...}` sort specification.
fn sort_criteria(spec: Option<&Value>) -> DbResult<Option<Vec<(String, i8)>>> {
    let Some(spec) = spec else {
        return Ok(None);
    };
    let Some(pairs) = spec.as_object() else {
        return Err(DbError::bad_query("sort specification must be an object"));
    };
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut criteria = Vec::with_capacity(pairs.len());
    for (key, direction) in pairs {
        let direction = match direction.as_number() {
            Some(n) if n == 1.0 => 1i8,
            Some(n) if n == -1.0 => -1i8,
            _ => {
                return Err(DbError::bad_query(format!(
                    "sort direction for {key} must be 1 or -1"
                )))
            }
        };
        criteria.push((key.clone(), direction));
    }
    Ok(Some(criteria))
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
