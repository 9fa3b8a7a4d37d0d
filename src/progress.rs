//! Ingestion progress reporting.
//!
//! [`ProgressStore`] is the single shared view of an in-flight load: the
//! ingestion task writes into it once per row, and any number of concurrent
//! observers (HTTP pollers, the SSE stream, the CLI) read snapshots out of
//! it. Every method takes one exclusive lock around its whole
//! read-modify-write and does no I/O while holding it, so a snapshot is
//! always internally consistent: `processed`, `percent`, and `timestamp`
//! never tear.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::models::ProgressSnapshot;

/// Thread-safe mutable snapshot of the current (or most recent) ingestion job.
#[derive(Debug, Default)]
pub struct ProgressStore {
    state: Mutex<ProgressSnapshot>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        // A poisoned lock only means a writer panicked mid-update; the state
        // itself is still a plain struct, so recover rather than propagate.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stamps `timestamp`, keeping it non-decreasing even if the wall clock
    /// steps backwards.
    fn touch(state: &mut ProgressSnapshot) {
        let now = Utc::now();
        state.timestamp = Some(match state.timestamp {
            Some(prev) if prev > now => prev,
            _ => now,
        });
    }

    /// Replaces the snapshot with a fresh running state for a new job.
    ///
    /// Called exactly once per job, before any [`increment_processed`] call.
    /// A `total_rows` of zero is allowed; percent then stays pinned at 0.
    ///
    /// [`increment_processed`]: ProgressStore::increment_processed
    pub fn reset_for_job(&self, file_name: &str, total_rows: u64) {
        let mut state = self.lock();
        *state = ProgressSnapshot {
            running: true,
            file: Some(file_name.to_string()),
            total: total_rows,
            ..ProgressSnapshot::default()
        };
        Self::touch(&mut state);
    }

    pub fn set_current_sheet(&self, sheet: &str) {
        let mut state = self.lock();
        state.current_sheet = Some(sheet.to_string());
        Self::touch(&mut state);
    }

    /// Adds `delta` processed rows and recomputes `percent`.
    ///
    /// When `sample_word` is non-blank and the new count is a multiple of
    /// `sample_stride`, the word is appended to `latest_words`, trimmed from
    /// the front to at most `latest_limit` entries. Returns the updated
    /// count so the caller can drive further decisions without re-reading.
    pub fn increment_processed(
        &self,
        delta: u64,
        sample_word: &str,
        sample_stride: u64,
        latest_limit: usize,
    ) -> u64 {
        let mut state = self.lock();
        state.processed += delta;
        let processed = state.processed;
        state.percent = if state.total > 0 {
            processed as f64 / state.total as f64 * 100.0
        } else {
            0.0
        };
        if !sample_word.trim().is_empty() && processed % sample_stride == 0 {
            state.latest_words.push(sample_word.to_string());
            while state.latest_words.len() > latest_limit {
                state.latest_words.remove(0);
            }
        }
        Self::touch(&mut state);
        processed
    }

    /// Marks the job finished. A non-empty `error` is recorded, an explicit
    /// empty string clears a previously recorded one, and `None` leaves it
    /// in place.
    pub fn mark_finished(&self, error: Option<String>) {
        let mut state = self.lock();
        state.running = false;
        match error {
            Some(err) if !err.is_empty() => state.error = Some(err),
            Some(_) => state.error = None,
            None => {}
        }
        Self::touch(&mut state);
    }

    pub fn clear_error(&self) {
        let mut state = self.lock();
        state.error = None;
        Self::touch(&mut state);
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Returns a deep, independent copy of the current state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }
}

/// Formats a count with thousands separators for progress lines.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}
