//! Transport Configuration
//!
//! Configuration types for selecting and tuning the transport mechanism.
//! The kind is chosen at run time, so one binary (and one test suite) can
//! exercise all three implementations.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport type selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// A pair of named pipes, one per direction
    #[serde(alias = "pipe")]
    Fifo,

    /// A pair of POSIX message queues holding one record each
    #[serde(alias = "queue")]
    Mq,

    /// One shared memory segment with two semaphore-guarded mailboxes
    #[default]
    #[serde(alias = "segment")]
    Shm,
}

impl TransportKind {
    /// All kinds, in a stable order
    pub const ALL: [Self; 3] = [Self::Fifo, Self::Mq, Self::Shm];

    /// Short name used in resource names and logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Mq => "mq",
            Self::Shm => "shm",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" | "pipe" => Ok(Self::Fifo),
            "mq" | "queue" => Ok(Self::Mq),
            "shm" | "segment" => Ok(Self::Shm),
            other => Err(format!(
                "unknown transport '{other}' (expected fifo, mq or shm)"
            )),
        }
    }
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Which transport to use
    pub kind: TransportKind,

    /// Prefix for every resource name
    ///
    /// Two hosts with different namespaces never collide.
    pub namespace: String,

    /// Directory holding the named pipes
    pub fifo_dir: PathBuf,

    /// Length of one internal wait cycle in milliseconds
    ///
    /// The shutdown token is checked once per cycle.
    pub poll_interval_ms: u64,

    /// How many times a joiner retries opening a missing resource
    pub open_attempts: u32,

    /// Delay between open attempts in milliseconds
    pub open_retry_ms: u64,

    /// Give up on a write after this many milliseconds (0 = wait until shutdown)
    pub write_timeout_ms: u64,

    /// Give up on a read after this many milliseconds (0 = wait until shutdown)
    pub read_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            namespace: "chat".to_string(),
            fifo_dir: std::env::temp_dir(),
            poll_interval_ms: 500,
            open_attempts: 100,
            open_retry_ms: 100,
            write_timeout_ms: 5000,
            read_timeout_ms: 0,
        }
    }
}

impl TransportConfig {
    /// Overlay environment variables onto this configuration
    ///
    /// Environment variables:
    /// - `SWITCHBOARD_TRANSPORT`: "fifo", "mq" or "shm"
    /// - `SWITCHBOARD_NAMESPACE`: resource name prefix
    /// - `SWITCHBOARD_FIFO_DIR`: directory for named pipes
    /// - `SWITCHBOARD_POLL_INTERVAL`: wait cycle in ms
    /// - `SWITCHBOARD_WRITE_TIMEOUT`: write deadline in ms
    ///
    /// Returns `true` if any variable was applied.
    pub fn apply_env(&mut self) -> bool {
        let mut applied = false;

        if let Some(kind) = std::env::var("SWITCHBOARD_TRANSPORT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.kind = kind;
            applied = true;
        }
        if let Ok(namespace) = std::env::var("SWITCHBOARD_NAMESPACE") {
            self.namespace = namespace;
            applied = true;
        }
        if let Ok(dir) = std::env::var("SWITCHBOARD_FIFO_DIR") {
            self.fifo_dir = PathBuf::from(dir);
            applied = true;
        }
        if let Some(ms) = std::env::var("SWITCHBOARD_POLL_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.poll_interval_ms = ms;
            applied = true;
        }
        if let Some(ms) = std::env::var("SWITCHBOARD_WRITE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.write_timeout_ms = ms;
            applied = true;
        }

        applied
    }

    /// One internal wait cycle (never zero)
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Delay between open attempts
    #[must_use]
    pub fn open_retry(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }

    /// Write deadline, if any
    #[must_use]
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    /// Read deadline, if any
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}
