// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates ranges and provides sensible defaults for every section
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub room_history: RoomHistoryConfig,
    #[serde(default)]
    pub reply: ReplyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite message database
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Largest candidate batch the engine will request
    #[serde(default = "default_max_fetch_rows")]
    pub max_fetch_rows: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Row cap for duration-only queries
    #[serde(default = "default_unbounded_limit")]
    pub unbounded_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_fetch_rows: default_max_fetch_rows(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            unbounded_limit: default_unbounded_limit(),
        }
    }
}

impl QueryConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_fetch_rows: self.max_fetch_rows,
            fetch_timeout: self.fetch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomHistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher runs first
    #[serde(default = "default_room_history_priority")]
    pub priority: i32,
    /// Phrase that activates a history query
    #[serde(default = "default_trigger_keyword")]
    pub trigger_keyword: String,
    /// 1..=500
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// 1..=720
    #[serde(default = "default_hours")]
    pub default_hours: u32,
}

impl Default for RoomHistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_room_history_priority(),
            trigger_keyword: default_trigger_keyword(),
            default_limit: default_limit(),
            default_hours: default_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reply_priority")]
    pub priority: i32,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_reply_priority(),
        }
    }
}

fn default_store_path() -> String {
    "./roomlog.db".to_string()
}

fn default_max_fetch_rows() -> usize {
    10_000
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_unbounded_limit() -> usize {
    500
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_room_history_priority() -> i32 {
    50
}

fn default_reply_priority() -> i32 {
    40
}

fn default_trigger_keyword() -> String {
    "查询聊天记录".to_string()
}

fn default_limit() -> usize {
    50
}

fn default_hours() -> u32 {
    24
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got: {}", name, val)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. ROOMLOG_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/roomlog/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("ROOMLOG_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = directories::ProjectDirs::from("", "", "roomlog")
            .map(|dirs| dirs.config_dir().join("config.toml"))?;
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        if let Ok(val) = std::env::var("ROOMLOG_DB_PATH") {
            config.store.path = val;
        }
        if let Ok(val) = std::env::var("ROOMLOG_TRIGGER") {
            config.room_history.trigger_keyword = val;
        }
        if let Some(val) = parse_env("ROOMLOG_DEFAULT_LIMIT")? {
            config.room_history.default_limit = val;
        }
        if let Some(val) = parse_env("ROOMLOG_DEFAULT_HOURS")? {
            config.room_history.default_hours = val;
        }
        if let Some(val) = parse_env("ROOMLOG_HANDLER_TIMEOUT_SECS")? {
            config.pipeline.handler_timeout_secs = val;
        }
        if let Some(val) = parse_env("ROOMLOG_FETCH_TIMEOUT_SECS")? {
            config.query.fetch_timeout_secs = val;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Invalid configuration")
    }

    pub fn validate(&self) -> Result<()> {
        let rh = &self.room_history;
        if rh.trigger_keyword.trim().is_empty() {
            anyhow::bail!("room_history.trigger_keyword must not be empty");
        }
        if !(1..=500).contains(&rh.default_limit) {
            anyhow::bail!(
                "room_history.default_limit must be between 1 and 500, got {}",
                rh.default_limit
            );
        }
        if !(1..=720).contains(&rh.default_hours) {
            anyhow::bail!(
                "room_history.default_hours must be between 1 and 720, got {}",
                rh.default_hours
            );
        }
        if self.query.max_fetch_rows == 0 {
            anyhow::bail!("query.max_fetch_rows must be at least 1");
        }
        if self.query.unbounded_limit == 0 {
            anyhow::bail!("query.unbounded_limit must be at least 1");
        }
        if self.query.fetch_timeout_secs == 0 {
            anyhow::bail!("query.fetch_timeout_secs must be at least 1");
        }
        if self.pipeline.handler_timeout_secs == 0 {
            anyhow::bail!("pipeline.handler_timeout_secs must be at least 1");
        }
        if self.store.path.trim().is_empty() {
            anyhow::bail!("store.path must not be empty");
        }
        Ok(())
    }
}
