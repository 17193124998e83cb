//! # FolioDB Storage
//!
//! Storage backends and durability primitives.
//!
//! This crate provides:
//! - The [`StorageBackend`] trait the persistence layer writes through
//! - [`FileBackend`] for the on-disk append-only datafile
//! - [`MemoryBackend`] for tests and ephemeral stores
//! - The fsync discipline: [`flush_to_storage`], [`crash_safe_write_file`]
//!   and [`ensure_datafile_integrity`]

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{
    crash_safe_write_file, ensure_datafile_integrity, flush_to_storage, temp_file_name,
    FileBackend,
};
pub use memory::MemoryBackend;
