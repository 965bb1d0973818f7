use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which path handles a forwarded post that is also part of a media group.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupedRepostPolicy {
    /// Render as a citing embed; album members beyond the first are dropped.
    #[default]
    Repost,
    /// Coalesce with the rest of the album and relay as a plain post.
    Batch,
}

impl std::fmt::Display for GroupedRepostPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupedRepostPolicy::Repost => write!(f, "repost"),
            GroupedRepostPolicy::Batch => write!(f, "batch"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default = "default_streamers_file")]
    pub streamers_file: PathBuf,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Falls back to the `TELEGRAM_TOKEN` environment variable when empty.
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchingConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_group_idle_secs")]
    pub group_idle_secs: u64,
    #[serde(default)]
    pub grouped_reposts: GroupedRepostPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub comment_threads: bool,
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    #[serde(default = "default_thread_auto_archive_minutes")]
    pub thread_auto_archive_minutes: u32,
    #[serde(default = "default_thread_greeting")]
    pub thread_greeting: String,
    #[serde(default = "default_true")]
    pub link_original_post: bool,
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: u64,
    #[serde(default = "default_repost_color")]
    pub repost_color: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
}

fn default_streamers_file() -> PathBuf {
    PathBuf::from("streamers.json")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/publisher.db")
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_group_idle_secs() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_thread_name() -> String {
    "Comments".to_string()
}

fn default_thread_auto_archive_minutes() -> u32 {
    60
}

fn default_thread_greeting() -> String {
    "Please keep the conversation in the comments civil!".to_string()
}

fn default_max_attachment_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_repost_color() -> u32 {
    1796358
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            group_idle_secs: default_group_idle_secs(),
            grouped_reposts: GroupedRepostPolicy::default(),
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            comment_threads: true,
            thread_name: default_thread_name(),
            thread_auto_archive_minutes: default_thread_auto_archive_minutes(),
            thread_greeting: default_thread_greeting(),
            link_original_post: true,
            max_attachment_bytes: default_max_attachment_bytes(),
            repost_color: default_repost_color(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
        }
    }
}

impl BatchingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn group_idle(&self) -> Duration {
        Duration::from_secs(self.group_idle_secs)
    }
}

impl DiscordConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TelegramConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let env_token = std::env::var("TELEGRAM_TOKEN").ok();
        Self::from_toml(&content, env_token)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate. `env_token` is only consulted when the file leaves
    /// `telegram.bot_token` empty.
    pub fn from_toml(content: &str, env_token: Option<String>) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse TOML")?;

        if config.telegram.bot_token.trim().is_empty() {
            config.telegram.bot_token = env_token.unwrap_or_default().trim().to_string();
        }
        if config.telegram.bot_token.is_empty() {
            bail!("telegram.bot_token is empty and TELEGRAM_TOKEN is not set");
        }
        if config.batching.flush_interval_secs == 0 {
            bail!("batching.flush_interval_secs must be greater than zero");
        }
        if config.discord.thread_name.trim().is_empty() {
            bail!("discord.thread_name must not be empty");
        }
        // Discord only accepts these archive windows.
        if ![60, 1440, 4320, 10080].contains(&config.discord.thread_auto_archive_minutes) {
            bail!(
                "discord.thread_auto_archive_minutes must be one of 60, 1440, 4320, 10080 (got {})",
                config.discord.thread_auto_archive_minutes
            );
        }

        Ok(config)
    }
}
