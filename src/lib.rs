//! # Spindle
//!
//! An offline disc-metadata service.
//!
//! Spindle imports a vendor tar archive of per-disc text records into a
//! local SQLite catalog, deduplicating and fingerprinting each disc, and
//! serves track-layout lookups over a line-based protocol (with a minimal
//! HTTP wrapper of the same commands).
//!
//! The workspace is split into [`spindle_core`] (record model, text
//! utilities, fingerprints, store), [`spindle_import`] (byte source, tar
//! reader, importer) and [`spindle_server`] (matching engine, protocol,
//! line server); the `spindle` binary lives in `spindle-cli`.

pub use spindle_core as core;
pub use spindle_import as import;
pub use spindle_server as server;
