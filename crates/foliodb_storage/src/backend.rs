//! Storage backend abstraction.

use crate::error::StorageResult;

/// Backing store for one datafile.
///
/// The persistence layer only ever appends whole records, reads the
/// entire file at load, and replaces the whole file at compaction.
/// Implementations decide how durable each of those is; `FileBackend`
/// fsyncs on every append and rewrites crash-safely.
pub trait StorageBackend: Send {
    /// Repairs the datafile after a possible crash and guarantees it exists.
    fn ensure_integrity(&mut self) -> StorageResult<()>;

    /// Reads the entire datafile.
    fn read_all(&mut self) -> StorageResult<String>;

    /// Appends raw bytes; the data is durable when this returns.
    fn append(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Atomically replaces the whole datafile with `data`.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
