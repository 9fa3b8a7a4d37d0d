//! Core data models used throughout WordVault.
//!
//! These types represent the entries, progress snapshots, and lookup results
//! that flow through the ingestion and lookup pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted dictionary entry, one row of the `entries` table.
///
/// `word_norm` is the normalized form of `word` and is never NULL, even when
/// the source cell was empty. The whole table is dropped and rebuilt at the
/// start of each ingestion run; there is no incremental update path.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub word_norm: String,
    pub word: Option<String>,
    pub phonetic: Option<String>,
    pub meaning: Option<String>,
    pub sheet: String,
    pub row_index: i64,
}

/// A record buffered by the ingestion engine before its batch is flushed.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub word_norm: String,
    pub word: Option<String>,
    pub phonetic: Option<String>,
    pub meaning: Option<String>,
    pub sheet: String,
    pub row_index: i64,
}

/// An internally consistent copy of the ingestion progress state.
///
/// Produced only by [`ProgressStore::snapshot`](crate::progress::ProgressStore::snapshot);
/// all fields were updated together under one lock, so `processed`, `percent`,
/// and `timestamp` always agree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub running: bool,
    pub file: Option<String>,
    pub current_sheet: Option<String>,
    pub processed: u64,
    pub total: u64,
    pub percent: f64,
    pub error: Option<String>,
    /// Recently processed display words, most recent last, FIFO-trimmed.
    pub latest_words: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A loadable wordbook file in the configured directory.
#[derive(Debug, Clone, Serialize)]
pub struct WordbookFile {
    pub name: String,
    pub size: u64,
    pub mtime: String,
}

/// Position of a word inside the source wordbook.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EntryLocation {
    pub sheet: String,
    pub row_index: i64,
}

/// Per-sheet entry count, used by the stats command.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SheetCount {
    pub sheet: String,
    pub entry_count: i64,
}
