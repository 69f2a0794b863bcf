//! Core domain model for spindle.
//!
//! This crate defines the disc record (parsing, normalization, derived
//! fingerprints and scores), the text utilities used for deduplication,
//! and the SQLite catalog adapter.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod fingerprint;
pub mod record;
pub mod store;
pub mod text;

pub use error::{Error, Result};
pub use record::DiscRecord;
pub use store::Catalog;
