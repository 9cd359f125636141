//! Configuration loading traits and types.
//!
//! The supervisor reads a single TOML file with three tables:
//! `[shared]`, `[server]` and `[stop]`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use msh_common::config::{ConfigError, MshConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MshConfig::load_validated(Path::new("msh.toml"))?;
//!     println!("Grace period: {:?}", config.stop.grace_period());
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_FLUSH_COMMAND, DEFAULT_FLUSH_WAIT_S, DEFAULT_GRACE_PERIOD_S, DEFAULT_IDLE_TIMEOUT_S,
    DEFAULT_POLL_INTERVAL_S, DEFAULT_READY_PATTERN, DEFAULT_SERVICE_NAME, DEFAULT_STOP_COMMAND,
    DEFAULT_STOPPING_PATTERN, MAX_DURATION_S,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "msh-survival"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance identifier used in log lines.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the managed server is launched and spoken to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Working directory of the managed process.
    pub folder: PathBuf,

    /// Program followed by its arguments.
    pub start_command: Vec<String>,

    /// Console line that requests a graceful shutdown.
    #[serde(default = "default_stop_command")]
    pub stop_command: String,

    /// Output substring marking the transition to online.
    #[serde(default = "default_ready_pattern")]
    pub ready_pattern: String,

    /// Output substring marking the transition to stopping.
    #[serde(default = "default_stopping_pattern")]
    pub stopping_pattern: String,
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.start_command.first() {
            None => {
                return Err(ConfigError::ValidationError(
                    "server.start_command cannot be empty".to_string(),
                ));
            }
            Some(program) if program.trim().is_empty() => {
                return Err(ConfigError::ValidationError(
                    "server.start_command program cannot be blank".to_string(),
                ));
            }
            Some(_) => {}
        }
        if self.stop_command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "server.stop_command cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stop, debounce and escalation timing. All durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopConfig {
    /// Delay between a stop request and the occupancy check.
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: f64,

    /// Time allowed for graceful shutdown; `0` disables forced termination.
    #[serde(default = "default_grace_period_s")]
    pub grace_period_s: f64,

    /// Status polling interval.
    #[serde(default = "default_poll_interval_s")]
    pub poll_interval_s: f64,

    /// Console line sent before a forced kill.
    #[serde(default = "default_flush_command")]
    pub flush_command: String,

    /// Buffer between the flush command and the kill signal.
    #[serde(default = "default_flush_wait_s")]
    pub flush_wait_s: f64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            idle_timeout_s: DEFAULT_IDLE_TIMEOUT_S,
            grace_period_s: DEFAULT_GRACE_PERIOD_S,
            poll_interval_s: DEFAULT_POLL_INTERVAL_S,
            flush_command: default_flush_command(),
            flush_wait_s: DEFAULT_FLUSH_WAIT_S,
        }
    }
}

impl StopConfig {
    /// Debounce delay applied to each stop request.
    pub fn idle_timeout(&self) -> Duration {
        seconds(self.idle_timeout_s)
    }

    /// Graceful shutdown allowance. `Duration::ZERO` means never force-kill.
    pub fn grace_period(&self) -> Duration {
        seconds(self.grace_period_s)
    }

    /// Interval between status polls.
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_s)
    }

    /// Delay between flush and kill.
    pub fn flush_wait(&self) -> Duration {
        seconds(self.flush_wait_s)
    }

    /// Whether the escalation watchdog may be armed.
    pub fn allows_kill(&self) -> bool {
        self.grace_period_s > 0.0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("stop.idle_timeout_s", self.idle_timeout_s),
            ("stop.grace_period_s", self.grace_period_s),
            ("stop.poll_interval_s", self.poll_interval_s),
            ("stop.flush_wait_s", self.flush_wait_s),
        ];
        for (name, value) in durations {
            if !(0.0..=MAX_DURATION_S).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0 and {MAX_DURATION_S} seconds (got {value})"
                )));
            }
        }
        if self.poll_interval_s == 0.0 {
            return Err(ConfigError::ValidationError(
                "stop.poll_interval_s must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MshConfig {
    /// Logging and identity.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Managed process launch settings.
    pub server: ServerConfig,

    /// Stop and escalation timing.
    #[serde(default)]
    pub stop: StopConfig,
}

impl MshConfig {
    /// Validate every table.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError::ValidationError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.server.validate()?;
        self.stop.validate()
    }

    /// Load from a TOML file and validate.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Trait for loading configuration from TOML files.
///
/// Default implementation for any `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Seconds as a `Duration`, clamped to `[0, MAX_DURATION_S]`. NaN maps to zero.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DURATION_S)).unwrap_or_default()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

fn default_stop_command() -> String {
    DEFAULT_STOP_COMMAND.to_string()
}

fn default_flush_command() -> String {
    DEFAULT_FLUSH_COMMAND.to_string()
}

fn default_ready_pattern() -> String {
    DEFAULT_READY_PATTERN.to_string()
}

fn default_stopping_pattern() -> String {
    DEFAULT_STOPPING_PATTERN.to_string()
}

fn default_idle_timeout_s() -> f64 {
    DEFAULT_IDLE_TIMEOUT_S
}

fn default_grace_period_s() -> f64 {
    DEFAULT_GRACE_PERIOD_S
}

fn default_poll_interval_s() -> f64 {
    DEFAULT_POLL_INTERVAL_S
}

fn default_flush_wait_s() -> f64 {
    DEFAULT_FLUSH_WAIT_S
}
