//! # FolioDB
//!
//! An embedded, single-process document datastore.
//!
//! Documents are schemaless JSON-like values persisted to a single
//! append-only datafile and served from in-memory indexes. Queries use
//! MongoDB-style selectors; writes are durable when the call returns
//! and the datafile is compacted crash-safely.
//!
//! ```rust
//! use foliodb_core::{Datastore, RemoveOptions};
//! use serde_json::json;
//!
//! # fn main() -> foliodb_core::DbResult<()> {
//! let db = Datastore::in_memory()?;
//!
//! db.insert(json!({"planet": "earth", "moons": 1}))?;
//! db.insert(json!({"planet": "mars", "moons": 2}))?;
//!
//! let rocky = db.find(json!({"moons": {"$lte": 2}})).sort(json!({"planet": 1})).exec()?;
//! assert_eq!(rocky.len(), 2);
//!
//! db.remove(json!({"planet": "mars"}), RemoveOptions::default())?;
//! assert_eq!(db.count(json!({}))?, 1);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod datastore;
mod error;
mod events;
mod executor;
mod index;
mod options;
mod persistence;
mod query;

pub use cursor::Cursor;
pub use datastore::{Datastore, RemoveOptions, UpdateOptions, UpdateResult};
pub use error::{DbError, DbResult};
pub use events::CompactionListener;
pub use index::IndexOptions;
pub use options::{DatastoreOptions, SerializationHook};
pub use query::{Query, WherePredicate};

pub use foliodb_codec::{CompareStrings, Value};
