//! Error types for storage backends.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The datafile path cannot be used.
    #[error("unusable datafile path: {path}")]
    BadPath {
        /// The offending path.
        path: PathBuf,
    },
}

impl StorageError {
    /// Creates a bad-path error.
    pub fn bad_path(path: impl Into<PathBuf>) -> Self {
        Self::BadPath { path: path.into() }
    }
}
