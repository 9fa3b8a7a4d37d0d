//! Load orchestration and shared application context.
//!
//! [`VaultContext`] is the explicitly constructed state object shared by the
//! server, the CLI, and the background job: configuration, the progress
//! store, the connection pool, and the readiness flag. It is built once at
//! startup and passed around in an `Arc`; there is no ambient global.
//!
//! [`Loader`] enforces single-flight: at most one ingestion job runs at a
//! time, owned as a [`JobHandle`]. Cancellation is a shared atomic flag the
//! engine polls at sheet/row boundaries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::ingest;
use crate::pool::ConnectionPool;
use crate::progress::ProgressStore;
use crate::workbook::Workbook;

/// The "data ready" pair consumed by lookup-style callers: whether at least
/// one ingestion has completed, and which source file it came from.
#[derive(Debug, Default, Clone)]
struct Readiness {
    loaded: bool,
    file: Option<PathBuf>,
}

/// Shared application state: config, progress store, pool, readiness.
pub struct VaultContext {
    pub config: Config,
    pub progress: ProgressStore,
    pub pool: ConnectionPool,
    readiness: RwLock<Readiness>,
}

impl VaultContext {
    pub fn new(config: Config) -> Self {
        let pool = ConnectionPool::new(config.db.path.clone(), config.pool.size);
        Self {
            config,
            progress: ProgressStore::new(),
            pool,
            readiness: RwLock::new(Readiness::default()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.read_readiness().loaded
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.read_readiness().file
    }

    fn read_readiness(&self) -> Readiness {
        self.readiness
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_readiness(&self, loaded: bool, file: Option<PathBuf>) {
        let mut guard = self.readiness.write().unwrap_or_else(|e| e.into_inner());
        guard.loaded = loaded;
        guard.file = file;
    }

    pub(crate) fn mark_loaded(&self, file: PathBuf) {
        self.set_readiness(true, Some(file));
    }

    /// Marks data present without knowing the source file, used when an
    /// existing database is detected on disk at startup.
    pub(crate) fn mark_loaded_existing(&self) {
        let mut guard = self.readiness.write().unwrap_or_else(|e| e.into_inner());
        guard.loaded = true;
    }

    pub(crate) fn mark_unloaded(&self) {
        self.set_readiness(false, None);
    }
}

/// Identifies the single currently-running (or absent) ingestion job.
pub struct JobHandle {
    pub id: Uuid,
    handle: JoinHandle<()>,
}

/// Single-flight load orchestrator. Owns the cancellation flag and at most
/// one background job; publishes results only through the progress store
/// and the context readiness flag.
pub struct Loader {
    ctx: Arc<VaultContext>,
    cancel: Arc<AtomicBool>,
    job: Mutex<Option<JobHandle>>,
}

impl Loader {
    pub fn new(ctx: Arc<VaultContext>) -> Self {
        Self {
            ctx,
            cancel: Arc::new(AtomicBool::new(false)),
            job: Mutex::new(None),
        }
    }

    /// Starts a background load of `path`. Returns `false` without side
    /// effects when a job is already running; the caller must retry later
    /// (no queueing). Returns `true` as soon as the job is spawned.
    pub fn start(&self, path: PathBuf) -> bool {
        let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());

        // The spawned task flips `running` only once it gets scheduled, so
        // an unfinished handle counts as running too; otherwise two starts
        // in quick succession could both pass the check.
        let already_running = self.ctx.progress.is_running()
            || job.as_ref().is_some_and(|j| !j.handle.is_finished());
        if already_running {
            warn!("load request rejected: a job is already running");
            return false;
        }

        self.ctx.mark_unloaded();
        self.cancel.store(false, Ordering::SeqCst);

        let id = Uuid::new_v4();
        let ctx = Arc::clone(&self.ctx);
        let cancel = Arc::clone(&self.cancel);
        let file = path.clone();
        let handle = tokio::spawn(async move {
            run_job(ctx, cancel, file, id).await;
        });
        *job = Some(JobHandle { id, handle });
        info!(job_id = %id, file = %path.display(), "load job started");
        true
    }

    /// Requests cooperative cancellation. The engine observes the flag at
    /// its next sheet/row poll point; termination is not immediate.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        info!("cancellation requested");
    }

    /// The id of the running job, if any.
    pub fn current_job(&self) -> Option<Uuid> {
        self.job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|j| !j.handle.is_finished())
            .map(|j| j.id)
    }

    /// Waits for the current job (if any) to finish. Used by the CLI and by
    /// tests; the HTTP surface only ever polls.
    pub async fn join(&self) {
        let job = self.job.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(job) = job {
            let _ = job.handle.await;
        }
    }

    /// Clears readiness and deletes the backing store file. Intended for
    /// the idle case but safe to call at any time; a running job will fail
    /// on its next write and report through the progress store.
    pub fn unload(&self) -> Result<()> {
        self.ctx.mark_unloaded();
        let path = &self.ctx.config.db.path;
        if path.exists() {
            std::fs::remove_file(path)?;
            info!(file = %path.display(), "database removed");
        }
        Ok(())
    }
}

async fn run_job(ctx: Arc<VaultContext>, cancel: Arc<AtomicBool>, path: PathBuf, job_id: Uuid) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    match load_and_rebuild(&ctx, &cancel, &path, &file_name).await {
        Ok(rows) => {
            ctx.mark_loaded(path);
            ctx.progress.mark_finished(None);
            info!(job_id = %job_id, file = %file_name, rows, "load complete");
        }
        Err(VaultError::Cancelled) => {
            ctx.progress.mark_finished(Some(VaultError::Cancelled.to_string()));
            ctx.mark_unloaded();
            info!(job_id = %job_id, file = %file_name, "load cancelled, rolled back");
        }
        Err(err) => {
            ctx.progress.mark_finished(Some(err.to_string()));
            ctx.mark_unloaded();
            error!(job_id = %job_id, file = %file_name, error = %err, "load failed");
        }
    }
}

async fn load_and_rebuild(
    ctx: &VaultContext,
    cancel: &AtomicBool,
    path: &Path,
    file_name: &str,
) -> Result<u64> {
    let workbook = match Workbook::open(path) {
        Ok(wb) => wb,
        Err(err) => {
            // Best-effort precount: an unreadable file still registers the
            // job (total 0) before failing it.
            ctx.progress.reset_for_job(file_name, 0);
            return Err(err.into());
        }
    };

    let total = workbook.total_rows();
    ctx.progress.reset_for_job(file_name, total);
    info!(file = %file_name, total_rows = total, "rebuilding entries");

    ingest::rebuild_entries(&ctx.config, &ctx.progress, &workbook, cancel).await?;
    Ok(total)
}

/// Whether lookups may run: fast path is the in-memory flag, cold path
/// probes the database on disk for an `entries` table (e.g. after a
/// restart with a previously built store).
pub async fn is_data_loaded(ctx: &VaultContext) -> bool {
    if ctx.is_loaded() {
        return true;
    }
    if !ctx.config.db.path.exists() || !ctx.pool.is_initialized() {
        return false;
    }

    let Ok(mut conn) = ctx.pool.acquire(ctx.config.pool.acquire_timeout()).await else {
        return false;
    };
    let exists: std::result::Result<Option<String>, sqlx::Error> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='entries'",
    )
    .fetch_optional(&mut *conn)
    .await;

    match exists {
        Ok(Some(_)) => {
            ctx.mark_loaded_existing();
            true
        }
        _ => false,
    }
}
