//! Configuration loading and validation.
//!
//! Loaded from `config.toml` (path from `--config`, `$RELAY_CONFIG_PATH`, or
//! `~/.discord-relay/config.toml`). Environment variables override file
//! values; file values override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::publisher::discord::{DiscordClientConfig, DEFAULT_API_BASE};
use crate::scheduler::{SchedulerConfig, DEFAULT_QUEUE_CAPACITY};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message store settings.
    pub database: DatabaseConfig,
    /// Discord channel settings.
    pub discord: DiscordConfig,
    /// Publish queue settings.
    pub queue: QueueConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Message store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. Defaults to `~/.discord-relay/relay.db`.
    pub path: Option<PathBuf>,
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Discord channel settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// REST API base URL.
    pub api_base: String,
    /// Channel that relayed messages are posted to.
    pub channel_id: String,
    /// Environment variable name holding the bot token.
    pub bot_token_env: String,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            channel_id: String::new(),
            bot_token_env: default_bot_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Publish queue settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Bounded queue capacity.
    pub capacity: usize,
    /// Time limit for each store call, in seconds.
    pub store_timeout_secs: u64,
    /// Time limit for each publish/update call, in seconds.
    pub publish_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            store_timeout_secs: default_store_timeout_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (`TRACE` … `FATAL`); `RUST_LOG` takes precedence.
    pub level: String,
    /// Directory for rolling JSON log files. Console only when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            logs_dir: None,
        }
    }
}

// Default value functions for serde

fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_bot_token_env() -> String {
    "DISCORD_BOT_TOKEN".to_owned()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_store_timeout_secs() -> u64 {
    5
}
fn default_publish_timeout_secs() -> u64 {
    15
}

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from this file.
    File(PathBuf),
    /// No file at this path; defaults were used.
    Defaults(PathBuf),
}

/// An environment override that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredOverride {
    /// Variable name.
    pub var: &'static str,
    /// Raw value that failed to parse.
    pub value: String,
}

/// Result of [`Config::load`].
///
/// Loading happens before logging is initialised, so what would otherwise be
/// logged is kept here and emitted by [`LoadedConfig::log`].
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The effective configuration.
    pub config: Config,
    /// File or defaults.
    pub source: ConfigSource,
    /// Env overrides that were skipped.
    pub ignored_overrides: Vec<IgnoredOverride>,
}

impl LoadedConfig {
    /// Log how the configuration was resolved.
    pub fn log(&self) {
        match &self.source {
            ConfigSource::File(path) => {
                tracing::info!(path = %path.display(), "loaded config from file");
            }
            ConfigSource::Defaults(path) => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
            }
        }
        for ignored in &self.ignored_overrides {
            tracing::warn!(
                var = ignored.var,
                value = %ignored.value,
                "ignoring invalid env override"
            );
        }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// An explicitly given path must exist; the implicit default path may be
    /// missing, in which case defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the home
    /// directory cannot be determined.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<LoadedConfig> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Load using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<LoadedConfig> {
        let (mut config, source) = match explicit {
            Some(path) => (load_config(path)?, ConfigSource::File(path.to_path_buf())),
            None => {
                let path = match env("RELAY_CONFIG_PATH") {
                    Some(p) => PathBuf::from(p),
                    None => config_dir()?.join("config.toml"),
                };
                if path.exists() {
                    (load_config(&path)?, ConfigSource::File(path))
                } else {
                    (Self::default(), ConfigSource::Defaults(path))
                }
            }
        };
        let ignored_overrides = config.apply_overrides(env);
        Ok(LoadedConfig {
            config,
            source,
            ignored_overrides,
        })
    }

    /// Apply environment variable overrides, returning the ones that were
    /// skipped because their value did not parse.
    ///
    /// Takes a resolver function so tests never mutate the process environment.
    pub fn apply_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Vec<IgnoredOverride> {
        let mut ignored = Vec::new();
        if let Some(v) = env("RELAY_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("RELAY_DISCORD_CHANNEL_ID") {
            self.discord.channel_id = v;
        }
        if let Some(v) = env("RELAY_DISCORD_API_BASE") {
            self.discord.api_base = v;
        }
        if let Some(v) = env("RELAY_QUEUE_CAPACITY") {
            match v.parse() {
                Ok(n) => self.queue.capacity = n,
                Err(_) => ignored.push(IgnoredOverride {
                    var: "RELAY_QUEUE_CAPACITY",
                    value: v,
                }),
            }
        }
        if let Some(v) = env("RELAY_LOG_LEVEL") {
            self.logging.level = v;
        }
        ignored
    }

    /// Check values that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.capacity == 0 {
            anyhow::bail!("queue.capacity must be greater than zero");
        }
        if self.queue.store_timeout_secs == 0 {
            anyhow::bail!("queue.store_timeout_secs must be greater than zero");
        }
        if self.queue.publish_timeout_secs == 0 {
            anyhow::bail!("queue.publish_timeout_secs must be greater than zero");
        }
        if self.discord.request_timeout_secs == 0 {
            anyhow::bail!("discord.request_timeout_secs must be greater than zero");
        }
        if self.discord.api_base.trim().is_empty() {
            anyhow::bail!("discord.api_base must not be empty");
        }
        Ok(())
    }

    /// Database path, falling back to `~/.discord-relay/relay.db`.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the home directory cannot
    /// be determined.
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("relay.db")),
        }
    }
}

impl DatabaseConfig {
    /// Busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl DiscordConfig {
    /// Build publisher settings using the resolved bot token.
    ///
    /// # Errors
    ///
    /// Returns an error if no channel id is configured.
    pub fn client_config(&self, bot_token: String) -> anyhow::Result<DiscordClientConfig> {
        if self.channel_id.trim().is_empty() {
            anyhow::bail!("discord.channel_id is required (or set RELAY_DISCORD_CHANNEL_ID)");
        }
        Ok(DiscordClientConfig {
            api_base: self.api_base.clone(),
            channel_id: self.channel_id.clone(),
            bot_token,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

impl QueueConfig {
    /// Scheduler runtime settings.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            queue_capacity: self.capacity,
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
        }
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.discord-relay/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".discord-relay"))
}
