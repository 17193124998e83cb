//! In-memory storage backend for tests.

use crate::backend::StorageBackend;
use crate::error::StorageResult;
use std::io::{Error, ErrorKind};

/// A storage backend holding the datafile in a byte buffer.
///
/// Used to exercise persistence logic without a filesystem; everything
/// is "durable" for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Vec<u8>,
}

impl MemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-filled with data, for recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns a copy of the backend contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }
}

impl StorageBackend for MemoryBackend {
    fn ensure_integrity(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn read_all(&mut self) -> StorageResult<String> {
        String::from_utf8(self.data.clone())
            .map_err(|e| Error::new(ErrorKind::InvalidData, e).into())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        self.data = data.to_vec();
        Ok(())
    }
}
