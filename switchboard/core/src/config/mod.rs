//! TOML Configuration File Support
//!
//! Centralized configuration loading for the host, supporting a TOML file
//! at `~/.config/switchboard/switchboard.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/switchboard/switchboard.toml` (typically `~/.config/switchboard/switchboard.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [host]
//! clients = 3
//! handshake_timeout_ms = 5000
//! router_tick_ms = 100
//! monitor_tick_ms = 5000
//! inactivity_timeout_secs = 60
//! termination_grace_ms = 1000
//! log_file = "log.txt"
//!
//! [transport]
//! kind = "shm"
//! namespace = "chat"
//! fifo_dir = "/tmp"
//! poll_interval_ms = 500
//! write_timeout_ms = 5000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::config::{TransportConfig, TransportKind};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Host section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostToml {
    /// Number of client processes
    pub clients: Option<u32>,

    /// Deadline for each handshake phase in milliseconds
    pub handshake_timeout_ms: Option<u64>,

    /// Router tick in milliseconds
    pub router_tick_ms: Option<u64>,

    /// Inactivity monitor tick in milliseconds
    pub monitor_tick_ms: Option<u64>,

    /// Seconds of silence before a client is evicted
    pub inactivity_timeout_secs: Option<u64>,

    /// Time a client gets between SIGTERM and SIGKILL, in milliseconds
    pub termination_grace_ms: Option<u64>,

    /// Append-only log file
    pub log_file: Option<PathBuf>,
}

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Transport kind
    pub kind: Option<TransportKind>,

    /// Resource name prefix
    pub namespace: Option<String>,

    /// Directory for named pipes
    pub fifo_dir: Option<PathBuf>,

    /// Wait cycle in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Joiner open attempts
    pub open_attempts: Option<u32>,

    /// Delay between open attempts in milliseconds
    pub open_retry_ms: Option<u64>,

    /// Write deadline in milliseconds (0 = none)
    pub write_timeout_ms: Option<u64>,

    /// Read deadline in milliseconds (0 = none)
    pub read_timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardToml {
    /// Host configuration section
    pub host: HostToml,

    /// Transport configuration section
    pub transport: TransportToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Host configuration
///
/// Consolidates all sources and records where the values came from. Use
/// [`load_config_from_path`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Number of client processes
    pub clients: u32,

    /// Deadline for each handshake phase
    pub handshake_timeout: Duration,

    /// Router tick
    pub router_tick: Duration,

    /// Inactivity monitor tick
    pub monitor_tick: Duration,

    /// Silence after which a client is evicted
    pub inactivity_timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub termination_grace: Duration,

    /// Append-only log file (`None` = console only)
    pub log_file: Option<PathBuf>,

    /// Transport selection and tuning
    pub transport: TransportConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            clients: 3,
            handshake_timeout: Duration::from_secs(5),
            router_tick: Duration::from_millis(100),
            monitor_tick: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(60),
            termination_grace: Duration::from_secs(1),
            log_file: Some(PathBuf::from("log.txt")),
            transport: TransportConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl HostConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the host cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients == 0 {
            return Err(ConfigError::ValidationError(
                "clients must be at least 1".into(),
            ));
        }
        if i32::try_from(self.clients).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "clients must fit a message id, got {}",
                self.clients
            )));
        }
        if self.transport.namespace.is_empty() {
            return Err(ConfigError::ValidationError(
                "namespace must not be empty".into(),
            ));
        }
        if self.router_tick.is_zero() || self.monitor_tick.is_zero() {
            return Err(ConfigError::ValidationError(
                "router and monitor ticks must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/switchboard/switchboard.toml` or
/// `~/.config/switchboard/switchboard.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("switchboard").join("switchboard.toml"))
}

/// Load configuration from the default path
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<HostConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// Environment variables are applied on top of the file.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<HostConfig, ConfigError> {
    let mut config = HostConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: SwitchboardToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut HostConfig, toml: &SwitchboardToml) {
    // Host settings
    if let Some(clients) = toml.host.clients {
        config.clients = clients;
    }
    if let Some(ms) = toml.host.handshake_timeout_ms {
        config.handshake_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.host.router_tick_ms {
        config.router_tick = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.host.monitor_tick_ms {
        config.monitor_tick = Duration::from_millis(ms);
    }
    if let Some(secs) = toml.host.inactivity_timeout_secs {
        config.inactivity_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = toml.host.termination_grace_ms {
        config.termination_grace = Duration::from_millis(ms);
    }
    if toml.host.log_file.is_some() {
        config.log_file = toml.host.log_file.clone();
    }

    // Transport settings
    let transport = &mut config.transport;
    if let Some(kind) = toml.transport.kind {
        transport.kind = kind;
    }
    if let Some(ref namespace) = toml.transport.namespace {
        transport.namespace = namespace.clone();
    }
    if let Some(ref dir) = toml.transport.fifo_dir {
        transport.fifo_dir = dir.clone();
    }
    if let Some(ms) = toml.transport.poll_interval_ms {
        transport.poll_interval_ms = ms;
    }
    if let Some(n) = toml.transport.open_attempts {
        transport.open_attempts = n;
    }
    if let Some(ms) = toml.transport.open_retry_ms {
        transport.open_retry_ms = ms;
    }
    if let Some(ms) = toml.transport.write_timeout_ms {
        transport.write_timeout_ms = ms;
    }
    if let Some(ms) = toml.transport.read_timeout_ms {
        transport.read_timeout_ms = ms;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut HostConfig) {
    if config.transport.apply_env() {
        config.source = ConfigSource::Env;
    }

    if let Ok(clients) = std::env::var("SWITCHBOARD_CLIENTS") {
        if let Ok(n) = clients.parse::<u32>() {
            config.clients = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Ok(path) = std::env::var("SWITCHBOARD_LOG_FILE") {
        config.log_file = (!path.is_empty()).then(|| PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    if let Ok(timeout) = std::env::var("SWITCHBOARD_INACTIVITY_TIMEOUT") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.inactivity_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Transport kind override
    pub transport: Option<TransportKind>,

    /// Client count override
    pub clients: Option<u32>,

    /// Log file override
    pub log_file: Option<PathBuf>,

    /// Namespace override
    pub namespace: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set transport override
    #[must_use]
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    /// Set client count override
    #[must_use]
    pub fn with_clients(mut self, clients: u32) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Set log file override
    #[must_use]
    pub fn with_log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    /// Set namespace override
    #[must_use]
    pub fn with_namespace(mut self, namespace: String) -> Self {
        self.namespace = Some(namespace);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut HostConfig) {
        if self.transport.is_some()
            || self.clients.is_some()
            || self.log_file.is_some()
            || self.namespace.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(kind) = self.transport {
            config.transport.kind = kind;
        }
        if let Some(clients) = self.clients {
            config.clients = clients;
        }
        if let Some(ref path) = self.log_file {
            config.log_file = Some(path.clone());
        }
        if let Some(ref namespace) = self.namespace {
            config.transport.namespace = namespace.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();

        assert_eq!(config.clients, 3);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.router_tick, Duration::from_millis(100));
        assert_eq!(config.monitor_tick, Duration::from_secs(5));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(60));
        assert_eq!(config.log_file, Some(PathBuf::from("log.txt")));
        assert_eq!(config.transport.kind, TransportKind::Shm);
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("switchboard/switchboard.toml"));
        }
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let toml_content = r#"
[host]
clients = 5
handshake_timeout_ms = 2000
router_tick_ms = 50
inactivity_timeout_secs = 30
log_file = "/var/tmp/chat.log"

[transport]
kind = "queue"
fifo_dir = "/run/chat"
poll_interval_ms = 250
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.clients, 5);
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.router_tick, Duration::from_millis(50));
        assert_eq!(config.inactivity_timeout, Duration::from_secs(30));
        assert_eq!(config.log_file, Some(PathBuf::from("/var/tmp/chat.log")));
        assert_eq!(config.transport.kind, TransportKind::Mq);
        assert_eq!(config.transport.fifo_dir, PathBuf::from("/run/chat"));
        assert_eq!(config.transport.poll_interval_ms, 250);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[host]\nmonitor_tick_ms = 1000\n").unwrap();

        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.monitor_tick, Duration::from_secs(1));
        assert_eq!(config.router_tick, Duration::from_millis(100));
        assert_eq!(config.termination_grace, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file_graceful() {
        let config =
            load_config_from_path(Some(PathBuf::from("/nonexistent/switchboard.toml"))).unwrap();
        assert_eq!(config.config_file_path, None);
        assert_eq!(config.clients, 3);
    }

    #[test]
    fn test_malformed_toml_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[host\nclients = three").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_transport_kind_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[transport]\nkind = \"socket\"\n").unwrap();

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[transport]\nnamespace = \"from_file\"\n")
            .unwrap();

        std::env::set_var("SWITCHBOARD_NAMESPACE", "from_env");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();
        std::env::remove_var("SWITCHBOARD_NAMESPACE");

        assert_eq!(config.transport.namespace, "from_env");
        assert_eq!(config.source(), ConfigSource::Env);
    }

    // =========================================================================
    // CLI Override Tests
    // =========================================================================

    #[test]
    fn test_config_overrides_apply() {
        let mut config = HostConfig::default();
        ConfigOverrides::new()
            .with_transport(TransportKind::Fifo)
            .with_clients(7)
            .with_namespace("ops".to_string())
            .with_log_file(PathBuf::from("ops.log"))
            .apply(&mut config);

        assert_eq!(config.transport.kind, TransportKind::Fifo);
        assert_eq!(config.clients, 7);
        assert_eq!(config.transport.namespace, "ops");
        assert_eq!(config.log_file, Some(PathBuf::from("ops.log")));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = HostConfig::default();
        ConfigOverrides::new().apply(&mut config);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    // =========================================================================
    // Validation Tests
    // =========================================================================

    #[test]
    fn test_validation_rejects_zero_clients() {
        let mut config = HostConfig::default();
        config.clients = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_empty_namespace() {
        let mut config = HostConfig::default();
        config.transport.namespace.clear();
        assert!(config.validate().is_err());
    }
}
