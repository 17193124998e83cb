//! Error types for FolioDB core.

use std::io;
use thiserror::Error;

/// Result type for datastore operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in datastore operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] foliodb_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] foliodb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A unique index already holds a document with this key.
    #[error("unique constraint violated on field {field} for key {key}")]
    UniqueViolation {
        /// Indexed field name.
        field: String,
        /// Display form of the violating key.
        key: String,
    },

    /// `ensure_index` was called without a field name.
    #[error("cannot create an index without a field name")]
    MissingFieldName,

    /// The update would change the document's `_id`.
    #[error("you cannot change a document's _id")]
    CannotChangeId,

    /// An update modifier was misused.
    #[error("bad modifier: {message}")]
    BadModifier {
        /// Description of the misuse.
        message: String,
    },

    /// A query uses an unknown operator or malformed shape.
    #[error("bad query: {message}")]
    BadQuery {
        /// Description of the problem.
        message: String,
    },

    /// A projection mixes inclusion and omission.
    #[error("bad projection: {message}")]
    BadProjection {
        /// Description of the problem.
        message: String,
    },

    /// Too much of the datafile failed to parse at load.
    ///
    /// Usually a sign of a missing or wrong deserialization hook.
    #[error(
        "more than {corrupt} of {total} datafile lines are corrupt; \
         refusing to load (threshold exceeded)"
    )]
    Corrupted {
        /// Number of unparseable lines.
        corrupt: usize,
        /// Total number of lines considered.
        total: usize,
    },

    /// The serialization hook pair is unusable.
    #[error("bad serialization hooks: {message}")]
    BadHooks {
        /// Description of the refusal.
        message: String,
    },

    /// The datafile name collides with the crash-safe temporary suffix.
    #[error("the datafile name can't end with a ~, which is reserved for crash safe backup files")]
    BadFilename,

    /// The executor worker is gone; no further operations can run.
    #[error("datastore executor is no longer running")]
    Stopped,
}

impl DbError {
    /// Creates a unique-violation error.
    pub fn unique_violation(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self::UniqueViolation {
            field: field.into(),
            key: key.into(),
        }
    }

    /// Creates a bad-modifier error.
    pub fn bad_modifier(message: impl Into<String>) -> Self {
        Self::BadModifier {
            message: message.into(),
        }
    }

    /// Creates a bad-query error.
    pub fn bad_query(message: impl Into<String>) -> Self {
        Self::BadQuery {
            message: message.into(),
        }
    }

    /// Creates a bad-projection error.
    pub fn bad_projection(message: impl Into<String>) -> Self {
        Self::BadProjection {
            message: message.into(),
        }
    }

    /// Creates a bad-hooks error.
    pub fn bad_hooks(message: impl Into<String>) -> Self {
        Self::BadHooks {
            message: message.into(),
        }
    }
}
