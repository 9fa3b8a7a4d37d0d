//! WordVault: xlsx wordbook ingestion into an indexed SQLite store, with
//! pooled lookups, live progress reporting, and an HTTP control surface.
//!
//! Module map:
//! - [`config`]: TOML configuration with defaults and validation
//! - [`error`]: the crate error taxonomy
//! - [`normalize`]: word-key normalization
//! - [`workbook`]: xlsx parsing (zip container, shared strings, sheets)
//! - [`models`]: entries, progress snapshots, lookup results
//! - [`db`]: SQLite connect options for readers and the ingest writer
//! - [`progress`]: the shared progress store
//! - [`pool`]: the bounded reader connection pool
//! - [`ingest`]: the drop-and-rebuild ingestion engine
//! - [`loader`]: shared context and the single-flight load orchestrator
//! - [`lookup`]: read queries over the entries table
//! - [`server`]: the axum HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod loader;
pub mod lookup;
pub mod models;
pub mod normalize;
pub mod pool;
pub mod progress;
pub mod server;
pub mod workbook;
