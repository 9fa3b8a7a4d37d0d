use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wordvault::config::load_config;
use wordvault::loader::{is_data_loaded, Loader, VaultContext};
use wordvault::lookup;
use wordvault::progress::format_number;
use wordvault::server;

#[derive(Parser)]
#[command(name = "wv", about = "Wordbook ingestion and lookup service", version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "./config/wordvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve,
    /// List loadable wordbook files
    Files,
    /// Ingest a wordbook file, waiting for completion
    Load {
        /// File name in the wordbook directory, or a path
        file: String,
    },
    /// Show the current load status
    Status,
    /// Look up a word's entry
    Lookup { word: String },
    /// List the wordbook positions of a word
    Locate { word: String },
    /// Show the entry at an exact sheet and row
    Row { sheet: String, row_index: i64 },
    /// Per-sheet entry counts
    Stats,
    /// Clear readiness and delete the database file
    Unload,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let ctx = Arc::new(VaultContext::new(config));

    match cli.command {
        Commands::Serve => {
            ctx.pool.initialize().await?;
            let loader = Arc::new(Loader::new(Arc::clone(&ctx)));
            server::run_server(ctx, loader).await?;
        }
        Commands::Files => {
            let files = server::list_wordbook_files(&ctx.config.wordbook.dir)?;
            if files.is_empty() {
                println!(
                    "no wordbook files in {}",
                    ctx.config.wordbook.dir.display()
                );
            }
            for f in files {
                println!("{:>12}  {}  {}", format_number(f.size), f.mtime, f.name);
            }
        }
        Commands::Load { file } => {
            run_load(&ctx, &file).await?;
        }
        Commands::Status => {
            ctx.pool.initialize().await?;
            let loaded = is_data_loaded(&ctx).await;
            let snap = ctx.progress.snapshot();
            println!("loaded:  {}", loaded);
            println!("running: {}", snap.running);
            if let Some(file) = &snap.file {
                println!("file:    {}", file);
            }
            if snap.total > 0 || snap.processed > 0 {
                println!(
                    "rows:    {} / {} ({:.1}%)",
                    format_number(snap.processed),
                    format_number(snap.total),
                    snap.percent
                );
            }
            if let Some(err) = &snap.error {
                println!("error:   {}", err);
            }
        }
        Commands::Lookup { word } => {
            require_loaded(&ctx).await?;
            match lookup::lookup_word(&ctx, &word).await? {
                Some(hit) => {
                    println!("word:     {}", hit.word.as_deref().unwrap_or("-"));
                    println!("phonetic: {}", hit.phonetic.as_deref().unwrap_or("-"));
                    println!("meaning:  {}", hit.meaning.as_deref().unwrap_or("-"));
                }
                None => bail!("word not found: {}", word),
            }
        }
        Commands::Locate { word } => {
            require_loaded(&ctx).await?;
            let matches = lookup::locate_word(&ctx, &word).await?;
            if matches.is_empty() {
                bail!("word not found: {}", word);
            }
            for loc in matches {
                println!("{}:{}", loc.sheet, loc.row_index);
            }
        }
        Commands::Row { sheet, row_index } => {
            require_loaded(&ctx).await?;
            match lookup::entry_at(&ctx, &sheet, row_index).await? {
                Some(hit) => {
                    println!("word:     {}", hit.word.as_deref().unwrap_or("-"));
                    println!("phonetic: {}", hit.phonetic.as_deref().unwrap_or("-"));
                    println!("meaning:  {}", hit.meaning.as_deref().unwrap_or("-"));
                }
                None => bail!("no entry at {}:{}", sheet, row_index),
            }
        }
        Commands::Stats => {
            require_loaded(&ctx).await?;
            let (total, per_sheet) = lookup::sheet_stats(&ctx).await?;
            println!("total entries: {}", format_number(total as u64));
            for s in per_sheet {
                println!("{:>10}  {}", format_number(s.entry_count as u64), s.sheet);
            }
        }
        Commands::Unload => {
            let loader = Loader::new(Arc::clone(&ctx));
            loader.unload()?;
            println!("unloaded");
        }
    }

    Ok(())
}

async fn require_loaded(ctx: &Arc<VaultContext>) -> Result<()> {
    ctx.pool.initialize().await?;
    if !is_data_loaded(ctx).await {
        bail!("no data loaded; run `wv load <file>` first");
    }
    Ok(())
}

/// Runs an in-process load and waits for it, drawing a progress line on a
/// terminal. Ctrl-C requests cooperative cancellation instead of killing
/// the process mid-transaction.
async fn run_load(ctx: &Arc<VaultContext>, file: &str) -> Result<()> {
    let path = resolve_wordbook(ctx, file)?;
    let loader = Loader::new(Arc::clone(ctx));
    if !loader.start(path.clone()) {
        bail!("a load is already running");
    }

    let interactive = atty::is(atty::Stream::Stderr);
    while loader.current_job().is_some() {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                eprintln!("cancelling...");
                loader.cancel();
            }
        }
        if interactive {
            let snap = ctx.progress.snapshot();
            if snap.running {
                eprint!(
                    "\r{}: {} / {} rows ({:.0}%)    ",
                    snap.current_sheet.as_deref().unwrap_or("-"),
                    format_number(snap.processed),
                    format_number(snap.total),
                    snap.percent
                );
            }
        }
    }
    loader.join().await;
    if interactive {
        eprintln!();
    }

    let snap = ctx.progress.snapshot();
    match snap.error {
        Some(err) => bail!("load failed: {}", err),
        None => {
            println!(
                "loaded {} rows from {}",
                format_number(snap.processed),
                path.display()
            );
            Ok(())
        }
    }
}

fn resolve_wordbook(ctx: &VaultContext, file: &str) -> Result<PathBuf> {
    let direct = Path::new(file);
    if direct.exists() {
        return Ok(direct.to_path_buf());
    }
    let in_dir = ctx.config.wordbook.dir.join(file);
    if in_dir.exists() {
        return Ok(in_dir);
    }
    Err(anyhow::anyhow!("wordbook file not found: {}", file))
        .with_context(|| format!("looked in {}", ctx.config.wordbook.dir.display()))
}
