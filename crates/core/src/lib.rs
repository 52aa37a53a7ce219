//! crashvault-core
//!
//! Core library for collecting, deduplicating and reporting crashes.
//!
//! This crate defines the crash record model and wire codec, the locked dump
//! directory store, fingerprinting and backtrace rating, the debuginfo cache
//! trimmer, the capability plugin registry, the SQLite deduplication ledger,
//! and the pipeline that drives a crash from capture to its reporters.
//!
//! All substantive logic lives here so it is fully testable and reusable from
//! multiple frontends.

pub mod model;
pub mod wire;
pub mod dump;
pub mod fingerprint;
pub mod rating;
pub mod cache;
pub mod plugins;
pub mod db;
pub mod services;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
