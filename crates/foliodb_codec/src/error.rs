//! Error types for the codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying JSON parser or printer failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field name violates the naming rules.
    #[error("field names cannot begin with '$' or contain '.': {key}")]
    BadKey {
        /// The offending field name.
        key: String,
    },
}

impl CodecError {
    /// Creates a bad-key error.
    pub fn bad_key(key: impl Into<String>) -> Self {
        Self::BadKey { key: key.into() }
    }
}
