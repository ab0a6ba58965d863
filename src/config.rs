//! Configuration parsing and validation.
//!
//! gitvault is configured with a single TOML file (default
//! `./config/gv.toml`). Every section is optional; missing keys fall back to
//! the defaults below.
//!
//! ```toml
//! [db]
//! dir = "./data/tenants"
//!
//! [remote]
//! api_base = "https://api.github.com"
//! timeout_secs = 30
//! max_attempts = 3
//! base_backoff_ms = 100
//!
//! [coordinator]
//! max_files_per_folder = 1000
//! max_title_entries_per_file = 1000
//! flush_threshold = 10
//! queue_depth = 64
//! token_ttl_buffer_secs = 300
//!
//! [limits]
//! max_title_entries = 30000
//! max_articles = 1000
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gitvault_core::allocator::AllocationLimits;
use gitvault_core::store::{StoreLimits, MAX_COMPLETED_TASKS};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// Directory holding one SQLite file per tenant.
    #[serde(default = "default_db_dir")]
    pub dir: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dir: default_db_dir(),
        }
    }
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("./data/tenants")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    100
}
fn default_user_agent() -> String {
    format!("gitvault/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    #[serde(default = "default_max_files_per_folder")]
    pub max_files_per_folder: i64,
    #[serde(default = "default_max_title_entries_per_file")]
    pub max_title_entries_per_file: i64,
    /// Buffered title lines that trigger a batch flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: i64,
    /// Requests a tenant worker may have queued before senders wait.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_token_ttl_buffer_secs")]
    pub token_ttl_buffer_secs: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_files_per_folder: default_max_files_per_folder(),
            max_title_entries_per_file: default_max_title_entries_per_file(),
            flush_threshold: default_flush_threshold(),
            queue_depth: default_queue_depth(),
            token_ttl_buffer_secs: default_token_ttl_buffer_secs(),
        }
    }
}

impl CoordinatorConfig {
    pub fn allocation_limits(&self) -> AllocationLimits {
        AllocationLimits {
            max_files_per_folder: self.max_files_per_folder,
            max_title_entries_per_file: self.max_title_entries_per_file,
        }
    }
}

fn default_max_files_per_folder() -> i64 {
    1000
}
fn default_max_title_entries_per_file() -> i64 {
    1000
}
fn default_flush_threshold() -> i64 {
    10
}
fn default_queue_depth() -> usize {
    64
}
fn default_token_ttl_buffer_secs() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_title_entries")]
    pub max_title_entries: i64,
    #[serde(default = "default_max_articles")]
    pub max_articles: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_title_entries: default_max_title_entries(),
            max_articles: default_max_articles(),
        }
    }
}

impl LimitsConfig {
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_title_entries: self.max_title_entries,
            max_articles: self.max_articles,
            max_completed_tasks: MAX_COMPLETED_TASKS,
        }
    }
}

fn default_max_title_entries() -> i64 {
    gitvault_core::store::MAX_TITLE_ENTRIES
}
fn default_max_articles() -> i64 {
    gitvault_core::store::MAX_ARTICLES_TO_STORE
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// All-defaults configuration, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Path of a tenant's SQLite database.
    pub fn tenant_db_path(&self, tenant: &str) -> PathBuf {
        self.db.dir.join(format!("{}.sqlite", tenant))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Remote
    if config.remote.api_base.trim().is_empty() {
        anyhow::bail!("remote.api_base must not be empty");
    }
    if config.remote.max_attempts < 1 {
        anyhow::bail!("remote.max_attempts must be >= 1");
    }
    if config.remote.timeout_secs == 0 {
        anyhow::bail!("remote.timeout_secs must be > 0");
    }

    // Coordinator
    if config.coordinator.max_files_per_folder < 1 {
        anyhow::bail!("coordinator.max_files_per_folder must be >= 1");
    }
    if config.coordinator.max_title_entries_per_file < 1 {
        anyhow::bail!("coordinator.max_title_entries_per_file must be >= 1");
    }
    if config.coordinator.flush_threshold < 1 {
        anyhow::bail!("coordinator.flush_threshold must be >= 1");
    }
    if config.coordinator.queue_depth == 0 {
        anyhow::bail!("coordinator.queue_depth must be > 0");
    }
    if config.coordinator.token_ttl_buffer_secs < 0 {
        anyhow::bail!("coordinator.token_ttl_buffer_secs must be >= 0");
    }

    // Limits
    if config.limits.max_title_entries < 1 {
        anyhow::bail!("limits.max_title_entries must be >= 1");
    }
    if config.limits.max_articles < 1 {
        anyhow::bail!("limits.max_articles must be >= 1");
    }

    Ok(())
}
