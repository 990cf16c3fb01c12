//! Adaptor configuration
//!
//! Loaded once at startup and shared read-only as `Arc<AdaptorConfig>`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SUPPORTED_ACCOUNTS: &str = "BUILTIN\\Administrators,\\Everyone,BUILTIN\\Users,\
BUILTIN\\Guest,NT AUTHORITY\\INTERACTIVE,NT AUTHORITY\\Authenticated Users";

pub const DEFAULT_BUILTIN_PREFIX: &str = "BUILTIN\\";

/// Upper bound on concurrent publishing tasks.
pub const MAX_PUBLISH_CONCURRENCY: usize = 64;

/// Configuration for the share adaptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptorConfig {
    /// Root of the share to index
    pub root: PathBuf,

    /// Built-in accounts that may still be published (comma separated or a list)
    #[serde(default = "default_supported_accounts", deserialize_with = "accounts")]
    pub supported_accounts: BTreeSet<String>,

    /// Prefix identifying built-in accounts (default `BUILTIN\`)
    #[serde(default = "default_builtin_prefix")]
    pub builtin_prefix: String,

    /// Publishing pool size (default 2 x CPUs, capped at 64)
    #[serde(default = "default_max_concurrent_publishes")]
    pub max_concurrent_publishes: usize,

    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,

    /// Base delay between publish retries, grows linearly per attempt
    #[serde(default = "default_publish_backoff_ms")]
    pub publish_backoff_ms: u64,

    /// Crawl workers resolving nodes in parallel (default CPUs)
    #[serde(default = "default_crawl_workers")]
    pub crawl_workers: usize,

    /// Content beyond this many bytes is not indexed (default 10 MiB)
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: u64,

    /// Directory for the full-text index
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
}

fn cpus() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn default_supported_accounts() -> BTreeSet<String> { parse_accounts(DEFAULT_SUPPORTED_ACCOUNTS) }
fn default_builtin_prefix() -> String { DEFAULT_BUILTIN_PREFIX.to_string() }
fn default_max_concurrent_publishes() -> usize { (cpus() * 2).clamp(1, MAX_PUBLISH_CONCURRENCY) }
fn default_publish_retries() -> u32 { 3 }
fn default_publish_backoff_ms() -> u64 { 200 }
fn default_crawl_workers() -> usize { cpus() }
fn default_max_content_bytes() -> u64 { 10 * 1024 * 1024 }
fn default_index_dir() -> PathBuf { PathBuf::from("index") }

#[derive(Deserialize)]
#[serde(untagged)]
enum AccountList {
    Csv(String),
    List(Vec<String>),
}

fn accounts<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match AccountList::deserialize(deserializer)? {
        AccountList::Csv(csv) => parse_accounts(&csv),
        AccountList::List(list) => list
            .iter()
            .map(|account| account.trim())
            .filter(|account| !account.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Split a comma separated account list, trimming blanks.
pub fn parse_accounts(csv: &str) -> BTreeSet<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|account| !account.is_empty())
        .map(str::to_string)
        .collect()
}

impl AdaptorConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            supported_accounts: default_supported_accounts(),
            builtin_prefix: default_builtin_prefix(),
            max_concurrent_publishes: default_max_concurrent_publishes(),
            publish_retries: default_publish_retries(),
            publish_backoff_ms: default_publish_backoff_ms(),
            crawl_workers: default_crawl_workers(),
            max_content_bytes: default_max_content_bytes(),
            index_dir: default_index_dir(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("invalid adaptor config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.root.is_absolute() {
            bail!("root {} must be an absolute path", self.root.display());
        }
        if self.crawl_workers == 0 {
            bail!("crawl_workers must be at least 1");
        }
        Ok(())
    }

    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }
}
