//! Ingestion engine: rebuilds the `entries` table from a parsed workbook.
//!
//! The rebuild is full, not incremental: the destination table is dropped
//! and recreated, then every row of every sheet is written inside one
//! transaction spanning the whole load. WAL journaling is enabled for the
//! bulk phase and checkpointed back into the main file afterwards, so no
//! sidecar log file outlives the run. Readers on other pooled connections
//! only ever observe the fully-old or fully-new table.
//!
//! Cancellation is cooperative: the shared flag is polled at sheet-loop and
//! row-loop entry, and a set flag rolls the transaction back in full.

use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::{Connection, Sqlite, Transaction};
use tracing::{debug, info};

use crate::config::Config;
use crate::db;
use crate::error::{Result, VaultError};
use crate::models::NewEntry;
use crate::normalize::normalize_word;
use crate::progress::ProgressStore;
use crate::workbook::{Sheet, Workbook};

/// Picks the 0-based word column for a sheet: sheets with a leading
/// row-number column carry the word in column 1, single-column sheets in
/// column 0.
pub(crate) fn word_column_index(sheet: &Sheet) -> usize {
    if sheet.column_count > 1 {
        1
    } else {
        0
    }
}

fn cell_text(row: &[Option<String>], col: usize) -> Option<String> {
    row.get(col).and_then(|c| c.clone())
}

/// Rebuilds the `entries` table from `workbook`, reporting per-row progress
/// into `progress` and honoring `cancel` at sheet and row boundaries.
pub async fn rebuild_entries(
    config: &Config,
    progress: &ProgressStore,
    workbook: &Workbook,
    cancel: &AtomicBool,
) -> Result<()> {
    let mut conn = db::open_writer(&config.db.path).await?;

    // Bulk-phase pragmas: WAL for write throughput, reverted after commit.
    sqlx::query("PRAGMA journal_mode=WAL")
        .fetch_optional(&mut conn)
        .await?;
    sqlx::query("PRAGMA synchronous=NORMAL")
        .execute(&mut conn)
        .await?;
    sqlx::query("PRAGMA temp_store=MEMORY")
        .execute(&mut conn)
        .await?;

    // Full-rebuild semantics. The drop commits before the load transaction
    // opens; a crash in between leaves an empty table rather than a stale
    // one (see DESIGN.md).
    sqlx::query("DROP TABLE IF EXISTS entries")
        .execute(&mut conn)
        .await?;
    sqlx::query(
        r#"
        CREATE TABLE entries (
            id INTEGER PRIMARY KEY,
            word_norm TEXT NOT NULL,
            word TEXT,
            phonetic TEXT,
            meaning TEXT,
            sheet TEXT,
            row_index INTEGER
        )
        "#,
    )
    .execute(&mut conn)
    .await?;

    progress.clear_error();

    let mut tx = conn.begin().await?;
    let mut batch: Vec<NewEntry> = Vec::with_capacity(config.ingest.batch_size);

    for sheet in &workbook.sheets {
        if cancel.load(Ordering::Relaxed) {
            // Dropping the open transaction rolls the whole load back.
            return Err(VaultError::Cancelled);
        }
        progress.set_current_sheet(&sheet.name);
        let word_col = word_column_index(sheet);

        for (row_index, row) in sheet.rows.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(VaultError::Cancelled);
            }

            let display_word = row
                .get(word_col)
                .and_then(|c| c.as_deref())
                .map(str::trim)
                .unwrap_or("")
                .to_string();
            let word_norm = normalize_word(&display_word);

            batch.push(NewEntry {
                word_norm,
                word: if display_word.is_empty() {
                    None
                } else {
                    Some(display_word.clone())
                },
                phonetic: cell_text(row, 2),
                meaning: cell_text(row, 3),
                sheet: sheet.name.clone(),
                row_index: row_index as i64,
            });

            progress.increment_processed(
                1,
                &display_word,
                config.ingest.sample_stride,
                config.ingest.latest_limit,
            );

            if batch.len() >= config.ingest.batch_size {
                flush_batch(&mut tx, &batch).await?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            flush_batch(&mut tx, &batch).await?;
            batch.clear();
        }
        debug!(sheet = %sheet.name, rows = sheet.rows.len(), "sheet written");
    }

    sqlx::query("CREATE INDEX idx_entries_word_norm ON entries(word_norm)")
        .execute(&mut *tx)
        .await?;
    sqlx::query("CREATE INDEX idx_entries_sheet_row ON entries(sheet, row_index)")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    // Merge the WAL into the main file and return to the standard journal
    // so no stray -wal/-shm files are left behind, then reclaim the space
    // freed by the dropped table.
    info!("checkpointing WAL into the main database file");
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .fetch_optional(&mut conn)
        .await?;
    sqlx::query("PRAGMA journal_mode=DELETE")
        .fetch_optional(&mut conn)
        .await?;
    info!("compacting database file");
    sqlx::query("VACUUM").execute(&mut conn).await?;

    conn.close().await?;
    Ok(())
}

/// Writes one buffered batch inside the load transaction. The INSERT is
/// prepared once and cached by sqlx, so this is an executemany in effect;
/// the batch exists to bound buffered memory, not statement size.
async fn flush_batch(tx: &mut Transaction<'_, Sqlite>, batch: &[NewEntry]) -> Result<()> {
    for entry in batch {
        sqlx::query(
            "INSERT INTO entries (word_norm, word, phonetic, meaning, sheet, row_index) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.word_norm)
        .bind(&entry.word)
        .bind(&entry.phonetic)
        .bind(&entry.meaning)
        .bind(&entry.sheet)
        .bind(entry.row_index)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_with_columns(column_count: usize) -> Sheet {
        Sheet {
            name: "s".to_string(),
            rows: Vec::new(),
            column_count,
        }
    }

    #[test]
    fn word_column_skips_leading_numbering_column() {
        assert_eq!(word_column_index(&sheet_with_columns(4)), 1);
        assert_eq!(word_column_index(&sheet_with_columns(2)), 1);
        assert_eq!(word_column_index(&sheet_with_columns(1)), 0);
        assert_eq!(word_column_index(&sheet_with_columns(0)), 0);
    }
}
