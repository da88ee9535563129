//! Daemon configuration: structs, parsing, and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_DICT_SOCKET_PATH, DEFAULT_HTTP_PORT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("invalid config value for {field}: {message}")]
    Validation { field: String, message: String },
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,

    #[serde(default)]
    pub plugins: PluginsSection,
}

impl DaemonConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config after deserialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.queue_start > self.daemon.queue_end {
            return Err(ConfigError::Validation {
                field: "daemon.queue_end".to_string(),
                message: format!(
                    "queue range is inverted ({} > {})",
                    self.daemon.queue_start, self.daemon.queue_end
                ),
            });
        }
        if self.daemon.session_idle_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "daemon.session_idle_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.daemon.reaper_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "daemon.reaper_interval_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.daemon.dict_socket_path.is_empty() {
            return Err(ConfigError::Validation {
                field: "daemon.dict_socket_path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.session_idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.reaper_interval_secs)
    }
}

// ── Daemon section ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// First NFQUEUE number to bind.
    #[serde(default)]
    pub queue_start: u16,

    /// Last NFQUEUE number to bind; fanout when it differs from start.
    #[serde(default)]
    pub queue_end: u16,

    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// IP address for the admin HTTP server to bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Unix socket path for the dictionary device protocol.
    #[serde(default = "default_dict_socket_path")]
    pub dict_socket_path: String,

    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout_secs: u64,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            queue_start: 0,
            queue_end: 0,
            log_level: default_log_level(),
            log_format: default_log_format(),
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            dict_socket_path: default_dict_socket_path(),
            session_idle_timeout_secs: default_session_idle_timeout(),
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

// ── Plugins section ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsSection {
    #[serde(default)]
    pub example: ExamplePluginConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamplePluginConfig {
    #[serde(default)]
    pub enabled: bool,

    /// The example plugin releases its subscription once a session has
    /// seen this many packets.
    #[serde(default = "default_example_release_after")]
    pub release_after_packets: u64,
}

impl Default for ExamplePluginConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            release_after_packets: default_example_release_after(),
        }
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_dict_socket_path() -> String {
    DEFAULT_DICT_SOCKET_PATH.to_string()
}
fn default_session_idle_timeout() -> u64 {
    600
}
fn default_reaper_interval() -> u64 {
    60
}
fn default_example_release_after() -> u64 {
    3
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            _ => Err(format!("invalid log format '{s}': expected json|text")),
        }
    }
}
