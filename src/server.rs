//! HTTP surface: load control, progress reporting, and lookups over axum.
//!
//! Handlers stay thin. All state lives in [`VaultContext`] and [`Loader`];
//! a handler validates its input, calls into the library, and maps the
//! error taxonomy onto status codes (`Validation` is 400, pool exhaustion
//! is 503, a busy loader is 409).

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Local, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::{Result, VaultError};
use crate::loader::{is_data_loaded, Loader, VaultContext};
use crate::lookup;
use crate::models::{ProgressSnapshot, WordbookFile};
use crate::normalize::normalize_word;

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<VaultContext>,
    pub loader: Arc<Loader>,
}

/// HTTP-facing error: a status code plus a stable machine-readable code.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: message.into(),
        }
    }

    fn not_ready() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "not_ready",
            message: "no data loaded".to_string(),
        }
    }
}

impl From<VaultError> for AppError {
    fn from(err: VaultError) -> Self {
        let (status, code) = match &err {
            VaultError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            VaultError::Cancelled => (StatusCode::CONFLICT, "cancelled"),
            VaultError::PoolExhausted(_) => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            VaultError::PoolClosed => (StatusCode::SERVICE_UNAVAILABLE, "pool_closed"),
            VaultError::Workbook(_) => (StatusCode::BAD_REQUEST, "bad_workbook"),
            VaultError::Storage(_) | VaultError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

/// Lists the loadable workbook files in `dir`, name-sorted. A missing
/// directory is an empty listing, not an error.
pub fn list_wordbook_files(dir: &std::path::Path) -> Result<Vec<WordbookFile>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let lower = name.to_lowercase();
        if !lower.ends_with(".xlsx") && !lower.ends_with(".xls") {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let mtime = meta
            .modified()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        files.push(WordbookFile {
            name,
            size: meta.len(),
            mtime,
        });
    }
    files.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(files)
}

#[derive(Debug, Clone, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    progress: ProgressSnapshot,
    loaded: bool,
    current_file: Option<String>,
}

async fn current_status(ctx: &VaultContext) -> StatusResponse {
    let loaded = is_data_loaded(ctx).await;
    StatusResponse {
        progress: ctx.progress.snapshot(),
        loaded,
        current_file: ctx
            .current_file()
            .map(|p| p.display().to_string()),
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn handle_files(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, AppError> {
    let files = list_wordbook_files(&state.ctx.config.wordbook.dir)?;
    Ok(Json(json!({ "files": files })))
}

#[derive(Debug, Deserialize)]
struct LoadRequest {
    file: String,
}

async fn handle_load(
    State(state): State<AppState>,
    Json(req): Json<LoadRequest>,
) -> std::result::Result<Json<serde_json::Value>, AppError> {
    let name = req.file.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("file is required"));
    }
    // Only names from the listing are loadable; this also keeps path
    // separators out of the request.
    let known = list_wordbook_files(&state.ctx.config.wordbook.dir)?;
    if !known.iter().any(|f| f.name == name) {
        return Err(AppError::bad_request(format!(
            "unknown wordbook file: {}",
            name
        )));
    }

    let path: PathBuf = state.ctx.config.wordbook.dir.join(name);
    let started = state.loader.start(path);
    if !started {
        return Err(AppError::conflict("a load is already running"));
    }
    Ok(Json(json!({ "started": true, "file": name })))
}

async fn handle_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(current_status(&state.ctx).await)
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    duration: Option<f64>,
    interval: Option<f64>,
}

struct StreamState {
    ctx: Arc<VaultContext>,
    last: Option<StatusResponse>,
    last_emit: Instant,
    interval: Duration,
    heartbeat: Duration,
    deadline: Instant,
    done: bool,
}

/// Server-sent progress events.
///
/// An event is emitted when the integer percent, the running flag, or the
/// store timestamp changes, and at least once per heartbeat while idle. The
/// stream self-terminates with a `done` payload after the requested
/// duration so abandoned browser tabs cannot pin a task forever.
async fn handle_status_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let duration = query.duration.unwrap_or(10.0).clamp(1.0, 60.0);
    let interval = query.interval.unwrap_or(0.5).clamp(0.1, 2.0);
    let interval = Duration::from_secs_f64(interval);
    let heartbeat = std::cmp::max(Duration::from_secs(2), interval * 3);

    let now = Instant::now();
    let stream_state = StreamState {
        ctx: Arc::clone(&state.ctx),
        last: None,
        last_emit: now,
        interval,
        heartbeat,
        deadline: now + Duration::from_secs_f64(duration),
        done: false,
    };

    let stream = futures::stream::unfold(stream_state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            if Instant::now() >= st.deadline {
                st.done = true;
                let payload = json!({ "event": "done", "timestamp": Utc::now() });
                return Some((Ok(Event::default().data(payload.to_string())), st));
            }

            let status = current_status(&st.ctx).await;
            let changed = match &st.last {
                None => true,
                Some(prev) => {
                    prev.progress.running != status.progress.running
                        || prev.progress.percent as i64 != status.progress.percent as i64
                        || prev.progress.timestamp != status.progress.timestamp
                }
            };

            if changed || st.last_emit.elapsed() >= st.heartbeat {
                st.last_emit = Instant::now();
                if let Ok(data) = serde_json::to_string(&status) {
                    st.last = Some(status);
                    return Some((Ok(Event::default().data(data)), st));
                }
                st.last = Some(status);
            }
            tokio::time::sleep(st.interval).await;
        }
    });

    Sse::new(stream)
}

async fn handle_cancel(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.loader.cancel();
    Json(json!({ "cancelling": true }))
}

async fn handle_unload(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, AppError> {
    if state.ctx.progress.is_running() {
        return Err(AppError::conflict("cannot unload while a load is running"));
    }
    state.loader.unload()?;
    Ok(Json(json!({ "unloaded": true })))
}

#[derive(Debug, Deserialize)]
struct WordQuery {
    word: String,
}

async fn handle_lookup(
    State(state): State<AppState>,
    Query(query): Query<WordQuery>,
) -> std::result::Result<Json<serde_json::Value>, AppError> {
    let word = query.word.trim();
    if word.is_empty() {
        return Err(AppError::bad_request("word is required"));
    }
    if !is_data_loaded(&state.ctx).await {
        return Err(AppError::not_ready());
    }

    match lookup::lookup_word(&state.ctx, word).await? {
        Some(hit) => Ok(Json(json!({ "word": word, "entry": hit }))),
        None => Err(AppError::not_found(format!("word not found: {}", word))),
    }
}

async fn handle_search(
    State(state): State<AppState>,
    Query(query): Query<WordQuery>,
) -> std::result::Result<Json<serde_json::Value>, AppError> {
    let word = query.word.trim();
    if word.is_empty() {
        return Err(AppError::bad_request("word is required"));
    }
    if !is_data_loaded(&state.ctx).await {
        return Err(AppError::not_ready());
    }

    let matches = lookup::locate_word(&state.ctx, word).await?;
    Ok(Json(json!({
        "word": word,
        "normalized": normalize_word(word),
        "count": matches.len(),
        "matches": matches,
    })))
}

#[derive(Debug, Deserialize)]
struct RowQuery {
    sheet: String,
    row_index: i64,
}

async fn handle_row(
    State(state): State<AppState>,
    Query(query): Query<RowQuery>,
) -> std::result::Result<Json<serde_json::Value>, AppError> {
    if !is_data_loaded(&state.ctx).await {
        return Err(AppError::not_ready());
    }

    match lookup::entry_at(&state.ctx, &query.sheet, query.row_index).await? {
        Some(hit) => Ok(Json(json!({
            "sheet": query.sheet,
            "row_index": query.row_index,
            "entry": hit,
        }))),
        None => Err(AppError::not_found(format!(
            "no entry at {}:{}",
            query.sheet, query.row_index
        ))),
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/files", get(handle_files))
        .route("/api/load", post(handle_load))
        .route("/api/status", get(handle_status))
        .route("/api/status/stream", get(handle_status_stream))
        .route("/api/cancel", post(handle_cancel))
        .route("/api/unload", post(handle_unload))
        .route("/api/lookup", get(handle_lookup))
        .route("/api/search", get(handle_search))
        .route("/api/row", get(handle_row))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(ctx: Arc<VaultContext>, loader: Arc<Loader>) -> anyhow::Result<()> {
    let bind = ctx.config.server.bind.clone();
    let app = build_router(AppState { ctx, loader });

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "wordvault server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
