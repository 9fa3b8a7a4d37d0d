//! Point and position lookups against the entries table.
//!
//! Every query borrows a reader connection from the context pool for the
//! duration of one statement; exhaustion surfaces as a retryable error, not
//! a crash. Callers are responsible for gating on the readiness flag first.

use serde::Serialize;

use crate::error::Result;
use crate::loader::VaultContext;
use crate::models::{EntryLocation, SheetCount};
use crate::normalize::normalize_word;

/// A matched entry's display fields.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WordHit {
    pub word: Option<String>,
    pub phonetic: Option<String>,
    pub meaning: Option<String>,
}

/// Looks up the first entry whose normalized key matches `raw`.
pub async fn lookup_word(ctx: &VaultContext, raw: &str) -> Result<Option<WordHit>> {
    let norm = normalize_word(raw);
    let mut conn = ctx.pool.acquire(ctx.config.pool.acquire_timeout()).await?;
    let hit = sqlx::query_as::<_, WordHit>(
        "SELECT word, phonetic, meaning FROM entries WHERE word_norm = ? LIMIT 1",
    )
    .bind(&norm)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(hit)
}

/// Finds the wordbook positions of a word.
pub async fn locate_word(ctx: &VaultContext, raw: &str) -> Result<Vec<EntryLocation>> {
    let norm = normalize_word(raw);
    let mut conn = ctx.pool.acquire(ctx.config.pool.acquire_timeout()).await?;
    let locations = sqlx::query_as::<_, EntryLocation>(
        "SELECT sheet, row_index FROM entries WHERE word_norm = ? ORDER BY sheet, row_index",
    )
    .bind(&norm)
    .fetch_all(&mut *conn)
    .await?;
    Ok(locations)
}

/// Fetches the entry at an exact (sheet, row) position.
pub async fn entry_at(ctx: &VaultContext, sheet: &str, row_index: i64) -> Result<Option<WordHit>> {
    let mut conn = ctx.pool.acquire(ctx.config.pool.acquire_timeout()).await?;
    let hit = sqlx::query_as::<_, WordHit>(
        "SELECT word, phonetic, meaning FROM entries WHERE sheet = ? AND row_index = ? LIMIT 1",
    )
    .bind(sheet)
    .bind(row_index)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(hit)
}

/// Total entry count plus a per-sheet breakdown, largest sheets first.
pub async fn sheet_stats(ctx: &VaultContext) -> Result<(i64, Vec<SheetCount>)> {
    let mut conn = ctx.pool.acquire(ctx.config.pool.acquire_timeout()).await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
        .fetch_one(&mut *conn)
        .await?;
    let per_sheet = sqlx::query_as::<_, SheetCount>(
        "SELECT sheet, COUNT(*) AS entry_count FROM entries GROUP BY sheet ORDER BY entry_count DESC",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok((total, per_sheet))
}
