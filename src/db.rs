use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::ConnectOptions;

use crate::error::Result;

fn base_options(db_path: &Path) -> Result<SqliteConnectOptions> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(crate::error::VaultError::from)?
        .create_if_missing(true);
    Ok(options)
}

/// Opens a pooled reader connection.
///
/// Readers pin `journal_mode=DELETE`, the steady-state mode the ingestion
/// engine leaves behind after its WAL checkpoint, so a reader connect never
/// flips the database back into WAL and recreates the sidecar files.
pub async fn open_reader(db_path: &Path) -> Result<SqliteConnection> {
    let options = base_options(db_path)?.journal_mode(SqliteJournalMode::Delete);
    let conn = options.connect().await?;
    Ok(conn)
}

/// Opens the dedicated writer connection used by one ingestion run.
///
/// Ensures the parent directory exists. Starts in the rollback journal; the
/// engine switches to WAL itself for the bulk phase and back afterwards.
pub async fn open_writer(db_path: &Path) -> Result<SqliteConnection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = base_options(db_path)?.journal_mode(SqliteJournalMode::Delete);
    let conn = options.connect().await?;
    Ok(conn)
}
