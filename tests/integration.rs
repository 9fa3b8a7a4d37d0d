//! End-to-end ingestion and lookup tests against real temp-dir databases.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use wordvault::config::{
    Config, DbConfig, IngestConfig, PoolConfig, ServerConfig, WordbookConfig,
};
use wordvault::error::VaultError;
use wordvault::ingest;
use wordvault::loader::{is_data_loaded, Loader, VaultContext};
use wordvault::lookup;
use wordvault::models::ProgressSnapshot;
use wordvault::progress::ProgressStore;
use wordvault::workbook::Workbook;

fn build_xlsx(sheets: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        let opts = zip::write::SimpleFileOptions::default();

        let sheet_tags: String = sheets
            .iter()
            .enumerate()
            .map(|(i, (name, _))| {
                format!(
                    r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                    name,
                    i + 1,
                    i + 1
                )
            })
            .collect();
        zip.start_file("xl/workbook.xml", opts).unwrap();
        zip.write_all(
            format!(
                r#"<?xml version="1.0"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
                sheet_tags
            )
            .as_bytes(),
        )
        .unwrap();

        for (i, (_, body)) in sheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), opts)
                .unwrap();
            zip.write_all(
                format!(
                    r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
                    body
                )
                .as_bytes(),
            )
            .unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn inline(cell: &str, value: &str) -> String {
    format!(r#"<c r="{}" t="inlineStr"><is><t>{}</t></is></c>"#, cell, value)
}

/// Two-sheet fixture: "Unit 1" has a numbering column plus word, phonetic
/// and meaning columns; "Extras" is a bare single-column word list.
fn sample_workbook_bytes() -> Vec<u8> {
    let unit1 = format!(
        r#"<row r="1"><c r="A1"><v>1</v></c>{}{}{}</row>
           <row r="2"><c r="A2"><v>2</v></c>{}{}{}</row>
           <row r="3"><c r="A3"><v>3</v></c></row>"#,
        inline("B1", "Apple"),
        inline("C1", "/ap.l/"),
        inline("D1", "a round fruit"),
        inline("B2", " Don&apos;t-Stop! "),
        inline("C2", "/dont.stop/"),
        inline("D2", "keep going"),
    );
    let extras = format!("<row r=\"1\">{}</row>", inline("A1", "zebra"));
    build_xlsx(&[("Unit 1", &unit1), ("Extras", &extras)])
}

fn test_config(tmp: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: tmp.path().join("vault.sqlite"),
        },
        pool: PoolConfig::default(),
        ingest: IngestConfig {
            // Small batch so a load spans several flushes.
            batch_size: 2,
            ..IngestConfig::default()
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        wordbook: WordbookConfig {
            dir: tmp.path().join("books"),
        },
    }
}

fn write_sample(tmp: &TempDir) -> PathBuf {
    let dir = tmp.path().join("books");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("sample.xlsx");
    std::fs::write(&path, sample_workbook_bytes()).unwrap();
    path
}

async fn load_and_wait(ctx: &Arc<VaultContext>, path: PathBuf) -> ProgressSnapshot {
    let loader = Loader::new(Arc::clone(ctx));
    assert!(loader.start(path), "start refused with no job running");
    loader.join().await;
    ctx.progress.snapshot()
}

#[tokio::test]
async fn full_load_then_lookups() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(VaultContext::new(test_config(&tmp)));
    let path = write_sample(&tmp);

    let snap = load_and_wait(&ctx, path).await;
    assert!(!snap.running);
    assert_eq!(snap.error, None);
    assert_eq!(snap.processed, 4);
    assert_eq!(snap.total, 4);
    assert!(ctx.is_loaded());

    ctx.pool.initialize().await.unwrap();

    // Word column 1 on the multi-column sheet, column 0 on the bare one.
    let apple = lookup::lookup_word(&ctx, "  APPLE ").await.unwrap().unwrap();
    assert_eq!(apple.word.as_deref(), Some("Apple"));
    assert_eq!(apple.phonetic.as_deref(), Some("/ap.l/"));
    assert_eq!(apple.meaning.as_deref(), Some("a round fruit"));

    let zebra = lookup::lookup_word(&ctx, "zebra").await.unwrap().unwrap();
    assert_eq!(zebra.word.as_deref(), Some("zebra"));
    assert!(zebra.phonetic.is_none());

    // Punctuation survives normalization, surrounding junk does not.
    let stop = lookup::lookup_word(&ctx, " DON'T-STOP !").await.unwrap().unwrap();
    assert_eq!(stop.word.as_deref(), Some("Don't-Stop!"));

    assert!(lookup::lookup_word(&ctx, "missing").await.unwrap().is_none());

    let locations = lookup::locate_word(&ctx, "apple").await.unwrap();
    assert_eq!(locations.len(), 1);
    assert_eq!(locations[0].sheet, "Unit 1");
    assert_eq!(locations[0].row_index, 0);

    // The blank row still exists positionally, with no display word.
    let blank = lookup::entry_at(&ctx, "Unit 1", 2).await.unwrap().unwrap();
    assert!(blank.word.is_none());

    let (total, per_sheet) = lookup::sheet_stats(&ctx).await.unwrap();
    assert_eq!(total, 4);
    assert_eq!(per_sheet.len(), 2);
    assert_eq!(per_sheet[0].sheet, "Unit 1");
    assert_eq!(per_sheet[0].entry_count, 3);
}

#[tokio::test]
async fn rebuild_creates_indexes_and_leaves_no_wal_sidecar() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(VaultContext::new(test_config(&tmp)));
    let path = write_sample(&tmp);
    load_and_wait(&ctx, path).await;

    ctx.pool.initialize().await.unwrap();
    let timeout = ctx.config.pool.acquire_timeout();
    let mut conn = ctx.pool.acquire(timeout).await.unwrap();
    let indexes: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='entries' ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await
    .unwrap();
    assert!(indexes.contains(&"idx_entries_word_norm".to_string()));
    assert!(indexes.contains(&"idx_entries_sheet_row".to_string()));
    drop(conn);

    // The checkpoint and journal-mode reset ran: no -wal or -shm remains.
    let wal = tmp.path().join("vault.sqlite-wal");
    let shm = tmp.path().join("vault.sqlite-shm");
    assert!(!wal.exists(), "-wal sidecar left behind");
    assert!(!shm.exists(), "-shm sidecar left behind");
}

#[tokio::test]
async fn second_load_replaces_the_table() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(VaultContext::new(test_config(&tmp)));
    let first = write_sample(&tmp);
    load_and_wait(&ctx, first).await;

    let second = tmp.path().join("books").join("tiny.xlsx");
    let tiny = format!("<row r=\"1\">{}</row>", inline("A1", "only"));
    std::fs::write(&second, build_xlsx(&[("Solo", &tiny)])).unwrap();
    let snap = load_and_wait(&ctx, second).await;
    assert_eq!(snap.error, None);

    ctx.pool.initialize().await.unwrap();
    let (total, per_sheet) = lookup::sheet_stats(&ctx).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(per_sheet[0].sheet, "Solo");
    assert!(lookup::lookup_word(&ctx, "apple").await.unwrap().is_none());
}

#[tokio::test]
async fn start_is_rejected_while_a_job_is_running() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(VaultContext::new(test_config(&tmp)));
    let loader = Loader::new(Arc::clone(&ctx));

    // Simulate an in-flight job through the store the orchestrator checks.
    ctx.progress.reset_for_job("other.xlsx", 100);
    assert!(!loader.start(tmp.path().join("whatever.xlsx")));
    assert!(loader.current_job().is_none());
}

#[tokio::test]
async fn cancelled_rebuild_leaves_an_empty_table() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let progress = ProgressStore::new();
    let workbook = Workbook::from_bytes(&sample_workbook_bytes()).unwrap();

    let cancel = AtomicBool::new(true);
    let err = ingest::rebuild_entries(&config, &progress, &workbook, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::Cancelled));

    // The transaction rolled back: the recreated table holds nothing.
    let ctx = Arc::new(VaultContext::new(config));
    ctx.pool.initialize().await.unwrap();
    let timeout = ctx.config.pool.acquire_timeout();
    let mut conn = ctx.pool.acquire(timeout).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn failed_load_reports_through_progress_and_stays_unloaded() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(VaultContext::new(test_config(&tmp)));
    let bogus = tmp.path().join("books").join("broken.xlsx");
    std::fs::create_dir_all(bogus.parent().unwrap()).unwrap();
    std::fs::write(&bogus, b"this is not an xlsx archive").unwrap();

    let snap = load_and_wait(&ctx, bogus).await;
    assert!(!snap.running);
    assert!(snap.error.is_some(), "parse failure not recorded");
    assert_eq!(snap.total, 0);
    assert!(!ctx.is_loaded());
}

#[tokio::test]
async fn readiness_probe_detects_an_existing_database() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let ctx = Arc::new(VaultContext::new(config.clone()));
    let path = write_sample(&tmp);
    load_and_wait(&ctx, path).await;

    // Fresh context over the same files, as after a restart.
    let cold = Arc::new(VaultContext::new(config));
    cold.pool.initialize().await.unwrap();
    assert!(!cold.is_loaded());
    assert!(is_data_loaded(&cold).await);
    assert!(cold.is_loaded());
}

#[tokio::test]
async fn unload_deletes_the_database_file() {
    let tmp = TempDir::new().unwrap();
    let ctx = Arc::new(VaultContext::new(test_config(&tmp)));
    let path = write_sample(&tmp);
    let loader = Loader::new(Arc::clone(&ctx));
    assert!(loader.start(path));
    loader.join().await;
    assert!(ctx.config.db.path.exists());

    loader.unload().unwrap();
    assert!(!ctx.config.db.path.exists());
    assert!(!ctx.is_loaded());

    // Unloading again is a no-op, not an error.
    loader.unload().unwrap();
}

#[tokio::test]
async fn pool_backpressure_surfaces_as_a_retryable_error() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.pool.size = 1;
    let ctx = Arc::new(VaultContext::new(config));
    let path = write_sample(&tmp);
    load_and_wait(&ctx, path).await;

    ctx.pool.initialize().await.unwrap();
    let held = ctx.pool.acquire(Duration::from_millis(100)).await.unwrap();
    let err = ctx.pool.acquire(Duration::from_millis(20)).await.unwrap_err();
    assert!(err.is_retryable());
    drop(held);

    let ok = lookup::lookup_word(&ctx, "apple").await;
    assert!(ok.is_ok(), "pool did not recover after release");
}
