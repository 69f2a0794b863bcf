//! Import pipeline for spindle.
//!
//! Streams a (optionally bzip2-compressed) tar archive of per-disc text
//! records, parses and deduplicates each record, and writes the catalog
//! tables in one bulk transaction.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod importer;
pub mod source;
pub mod tar;

pub use error::{ImportError, Result, SourceError, TarError};
pub use importer::{ImportReport, Importer};
pub use source::ByteSource;
pub use tar::{EntryKind, TarEntry, TarReader};
