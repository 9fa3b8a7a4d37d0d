use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
    pub wordbook: WordbookConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

fn default_pool_size() -> usize {
    5
}
fn default_acquire_timeout_ms() -> u64 {
    5000
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Rows buffered in memory before a flush to SQLite.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Every Nth processed row contributes its display word to the
    /// progress sample ring.
    #[serde(default = "default_sample_stride")]
    pub sample_stride: u64,
    /// Maximum number of sampled words retained (most recent last).
    #[serde(default = "default_latest_limit")]
    pub latest_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sample_stride: default_sample_stride(),
            latest_limit: default_latest_limit(),
        }
    }
}

fn default_batch_size() -> usize {
    10_000
}
fn default_sample_stride() -> u64 {
    10
}
fn default_latest_limit() -> usize {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WordbookConfig {
    /// Directory scanned for loadable .xlsx/.xls files.
    pub dir: PathBuf,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.pool.size == 0 {
        anyhow::bail!("pool.size must be > 0");
    }

    if config.ingest.batch_size == 0 {
        anyhow::bail!("ingest.batch_size must be > 0");
    }

    if config.ingest.sample_stride == 0 {
        anyhow::bail!("ingest.sample_stride must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_omitted() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "data/wordvault.sqlite"

            [server]
            bind = "127.0.0.1:7400"

            [wordbook]
            dir = "wordbooks"
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.size, 5);
        assert_eq!(config.pool.acquire_timeout(), Duration::from_millis(5000));
        assert_eq!(config.ingest.batch_size, 10_000);
        assert_eq!(config.ingest.sample_stride, 10);
        assert_eq!(config.ingest.latest_limit, 40);
    }
}
