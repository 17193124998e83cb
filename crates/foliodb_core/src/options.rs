//! Datastore configuration.

use foliodb_codec::CompareStrings;
use std::path::PathBuf;
use std::sync::Arc;

/// A line transform applied after serialization or before
/// deserialization (e.g. for encryption at rest).
///
/// The two hooks of a pair must be exact inverses of one another; this
/// is checked at construction.
pub type SerializationHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Configuration for opening a datastore.
#[derive(Clone, Default)]
pub struct DatastoreOptions {
    /// Path to the datafile. Absent means in-memory only.
    pub filename: Option<PathBuf>,

    /// Disables persistence even when a filename is given.
    pub in_memory_only: bool,

    /// Maintain `createdAt` / `updatedAt` fields automatically.
    pub timestamp_data: bool,

    /// Load the datafile during construction.
    pub autoload: bool,

    /// Fraction of unparseable datafile lines tolerated at load.
    /// Clamped to [0, 1]. `None` means the 0.1 default.
    pub corrupt_alert_threshold: Option<f64>,

    /// Transform applied to each serialized line before it is written.
    pub after_serialization: Option<SerializationHook>,

    /// Transform applied to each raw line before it is parsed.
    pub before_deserialization: Option<SerializationHook>,

    /// Custom string comparator, used by `sort` only.
    pub compare_strings: Option<CompareStrings>,
}

impl DatastoreOptions {
    /// Creates a configuration with default values (in-memory only).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the datafile path.
    #[must_use]
    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filename = Some(path.into());
        self
    }

    /// Forces the datastore to stay in memory.
    #[must_use]
    pub fn in_memory_only(mut self, value: bool) -> Self {
        self.in_memory_only = value;
        self
    }

    /// Enables automatic `createdAt` / `updatedAt` timestamps.
    #[must_use]
    pub fn timestamp_data(mut self, value: bool) -> Self {
        self.timestamp_data = value;
        self
    }

    /// Loads the datafile during construction.
    #[must_use]
    pub fn autoload(mut self, value: bool) -> Self {
        self.autoload = value;
        self
    }

    /// Sets the corruption tolerance, clamped to [0, 1].
    #[must_use]
    pub fn corrupt_alert_threshold(mut self, fraction: f64) -> Self {
        self.corrupt_alert_threshold = Some(fraction.clamp(0.0, 1.0));
        self
    }

    /// Sets the post-serialization line transform.
    #[must_use]
    pub fn after_serialization(mut self, hook: SerializationHook) -> Self {
        self.after_serialization = Some(hook);
        self
    }

    /// Sets the pre-deserialization line transform.
    #[must_use]
    pub fn before_deserialization(mut self, hook: SerializationHook) -> Self {
        self.before_deserialization = Some(hook);
        self
    }

    /// Sets the string comparator used by `sort`.
    #[must_use]
    pub fn compare_strings(mut self, cmp: CompareStrings) -> Self {
        self.compare_strings = Some(cmp);
        self
    }
}

impl std::fmt::Debug for DatastoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreOptions")
            .field("filename", &self.filename)
            .field("in_memory_only", &self.in_memory_only)
            .field("timestamp_data", &self.timestamp_data)
            .field("autoload", &self.autoload)
            .field("corrupt_alert_threshold", &self.corrupt_alert_threshold)
            .field("after_serialization", &self.after_serialization.is_some())
            .field("before_deserialization", &self.before_deserialization.is_some())
            .field("compare_strings", &self.compare_strings.is_some())
            .finish()
    }
}
