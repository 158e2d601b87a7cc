//! Configuration file management for foreman.
//!
//! Provides a TOML-based config file at `~/.config/foreman/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use foreman_core::config::{
    DecompositionConfig, EngineConfig, NotificationChannel, ToolTransport, WorkerCommandConfig,
};
use foreman_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub tool_transport: Option<TransportSection>,
    #[serde(default)]
    pub decomposition: Option<DecompositionSection>,
    #[serde(default)]
    pub notifications: Option<NotificationsSection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_string(),
        }
    }
}

/// `[engine]`: scheduler and retry tuning. All fields optional; defaults
/// come from [`EngineConfig`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineSection {
    pub polling_interval_seconds: Option<u64>,
    pub heartbeat_timeout: Option<u64>,
    pub default_role_timeout: Option<u64>,
    /// `[engine.role_timeout]` table: role -> seconds.
    #[serde(default)]
    pub role_timeout: HashMap<String, u64>,
    pub max_retries: Option<u32>,
    pub graceful_shutdown_timeout_ms: Option<u64>,
    pub max_recent_messages: Option<usize>,
}

/// `[worker]`: options passed verbatim into the worker command line.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkerSection {
    pub worker_binary_path: Option<String>,
    pub worker_model: Option<String>,
    pub worker_output_format: Option<String>,
    pub worker_max_turns: Option<u32>,
    pub dangerously_skip_permissions: Option<bool>,
}

/// `[tool_transport]`: how workers reach the inbound facade.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransportSection {
    #[serde(rename = "type")]
    pub transport_type: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecompositionSection {
    pub tokens_per_file: Option<u64>,
    pub safe_context_tokens: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationsSection {
    pub channel: Option<String>,
}

impl ConfigFile {
    /// Merge the file over engine defaults.
    pub fn to_engine_config(&self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();

        let tool_transport = match &self.tool_transport {
            None => defaults.tool_transport.clone(),
            Some(section) => match section.transport_type.as_str() {
                "stdio" => ToolTransport::Stdio,
                "http-sse" => ToolTransport::HttpSse {
                    host: section
                        .host
                        .clone()
                        .unwrap_or_else(|| "127.0.0.1".to_string()),
                    port: section.port.unwrap_or(8700),
                },
                other => bail!("invalid tool_transport type {other:?} (expected stdio or http-sse)"),
            },
        };

        let notifications = match self.notifications.as_ref().and_then(|n| n.channel.as_deref()) {
            None | Some("console") => NotificationChannel::Console,
            Some("disabled") => NotificationChannel::Disabled,
            Some(other) => bail!(
                "invalid notifications channel {other:?} (expected console or disabled)"
            ),
        };

        Ok(EngineConfig {
            polling_interval: self
                .engine
                .polling_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.polling_interval),
            heartbeat_timeout: self
                .engine
                .heartbeat_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_timeout),
            default_role_timeout: self
                .engine
                .default_role_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_role_timeout),
            role_timeouts: self
                .engine
                .role_timeout
                .iter()
                .map(|(role, secs)| (role.to_lowercase(), Duration::from_secs(*secs)))
                .collect(),
            max_retries: self.engine.max_retries.unwrap_or(defaults.max_retries),
            graceful_shutdown_timeout: self
                .engine
                .graceful_shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.graceful_shutdown_timeout),
            cache_ttl: defaults.cache_ttl,
            max_recent_messages: self
                .engine
                .max_recent_messages
                .unwrap_or(defaults.max_recent_messages),
            worker: WorkerCommandConfig {
                binary_path: self
                    .worker
                    .worker_binary_path
                    .clone()
                    .unwrap_or(defaults.worker.binary_path),
                model: self.worker.worker_model.clone(),
                output_format: self
                    .worker
                    .worker_output_format
                    .clone()
                    .or(defaults.worker.output_format),
                max_turns: self.worker.worker_max_turns,
                dangerously_skip_permissions: self
                    .worker
                    .dangerously_skip_permissions
                    .unwrap_or(false),
            },
            tool_transport,
            decomposition: match &self.decomposition {
                None => defaults.decomposition,
                Some(section) => DecompositionConfig {
                    tokens_per_file: section
                        .tokens_per_file
                        .unwrap_or(defaults.decomposition.tokens_per_file),
                    safe_context_tokens: section
                        .safe_context_tokens
                        .unwrap_or(defaults.decomposition.safe_context_tokens),
                },
            },
            notifications,
        })
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the foreman config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/foreman` or
/// `~/.config/foreman`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("foreman");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("foreman")
}

/// Return the path to the foreman config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ForemanConfig {
    pub db_config: DbConfig,
    pub engine: EngineConfig,
}

impl ForemanConfig {
    /// Resolve using the chain: CLI flag > env var > config file > default.
    ///
    /// The database URL resolves `cli_db_url` > `FOREMAN_DATABASE_URL` >
    /// `config_file.database.url` > `DbConfig::DEFAULT_URL`; engine options
    /// come from the config file over built-in defaults.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = load_config().ok();

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var("FOREMAN_DATABASE_URL") {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let engine = match file_config {
            Some(cfg) => cfg.to_engine_config()?,
            None => EngineConfig::default(),
        };

        Ok(Self {
            db_config: DbConfig::new(db_url),
            engine,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
