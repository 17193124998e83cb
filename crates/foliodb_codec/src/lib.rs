//! # FolioDB Codec
//!
//! Value model and datafile line codec for FolioDB.
//!
//! This crate provides:
//! - The dynamic [`Value`] type used for documents and queries
//! - The heterogeneous total ordering used by indexes and sorting
//! - Dot-notation path access into documents
//! - The one-record-per-line datafile encoding with its date transform

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod doc;
mod error;
mod path;
mod serialize;
mod value;

pub use doc::{check_document, is_valid_key, strict_copy};
pub use error::{CodecError, CodecResult};
pub use path::get_dot_value;
pub use serialize::{deserialize, serialize};
pub use value::{compare_values, compare_values_with, values_equal, CompareStrings, Value};
