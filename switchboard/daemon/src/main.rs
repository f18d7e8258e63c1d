//! Switchboard - Multi-Process Chat Host
//!
//! Forks the configured number of chat clients, connects to each over the
//! selected IPC transport, and relays messages typed at the console.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (3 clients over shared memory)
//! switchboard
//!
//! # Named pipes, five clients
//! switchboard --transport fifo --clients 5
//!
//! # With config file
//! switchboard --config ./switchboard.toml
//!
//! # Verbose logging
//! RUST_LOG=debug switchboard
//! ```
//!
//! # Console
//!
//! - `all:<text>`: broadcast to every client
//! - `to <id>:<text>`: send to one client
//! - `quit` / `exit`: shut down
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use tracing::{info, warn};

use switchboard_core::console::USAGE;
use switchboard_core::{
    init_logging, load_config, load_config_from_path, ConfigOverrides, ConsoleOutcome, Host,
    HostConfig, ShutdownToken, TransportKind,
};

/// How often the console loop checks for a signal-driven shutdown
const CONSOLE_TICK: Duration = Duration::from_millis(100);

/// Switchboard - chat host relaying between forked clients over local IPC
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Transport: fifo, mq or shm
    #[arg(short = 't', long, env = "SWITCHBOARD_TRANSPORT", value_name = "KIND")]
    transport: Option<TransportKind>,

    /// Number of client processes
    #[arg(short = 'n', long, value_name = "N")]
    clients: Option<u32>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Append-only log file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prefix for every IPC resource name
    #[arg(long, value_name = "NAME")]
    namespace: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            transport: self.transport,
            clients: self.clients,
            log_file: self.log_file.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Signals that request shutdown
fn shutdown_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set
}

/// Turn `SIGINT`/`SIGTERM` into a token cancellation
///
/// The signals must already be blocked in every thread.
fn spawn_signal_watcher(token: ShutdownToken) -> Result<()> {
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || match shutdown_signals().wait() {
            Ok(signal) => {
                info!(signal = ?signal, "Received {signal}, initiating shutdown");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "sigwait failed"),
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

/// Read stdin lines on a dedicated thread
///
/// The channel disconnects at end of input.
fn spawn_console_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn console thread")?;
    Ok(rx)
}

/// Where the configuration came from, for the startup log
///
/// Config loading runs before the subscriber exists, so this is reported
/// once logging is up.
fn config_origin(config: &HostConfig) -> String {
    match config.config_file_path {
        Some(ref path) => format!("Loaded configuration from {}", path.display()),
        None => "No config file found, using defaults".to_string(),
    }
}

fn run_console(host: &Host, token: &ShutdownToken, lines: &mpsc::Receiver<String>) {
    loop {
        if token.is_cancelled() {
            break;
        }
        match lines.recv_timeout(CONSOLE_TICK) {
            Ok(line) => {
                if host.handle_line(&line) == ConsoleOutcome::Quit {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("Console input closed, shutting down");
                break;
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_logging(&args.log_level, config.log_file.as_deref())?;

    info!("=== Chat server starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("PID: {}", std::process::id());
    info!("{}", config_origin(&config));
    info!(
        transport = %config.transport.kind,
        clients = config.clients,
        source = %config.source(),
        "Configuration loaded"
    );

    // Block before any thread exists so every thread (and every forked
    // client, until it unblocks) inherits the mask
    shutdown_signals()
        .thread_block()
        .context("Failed to block shutdown signals")?;

    let token = ShutdownToken::new();
    let mut host = Host::launch(config, token.clone()).context("Failed to start host")?;

    spawn_signal_watcher(token.clone())?;
    host.await_handshake();
    host.start_services().context("Failed to start host services")?;

    info!("Chat server ready. Commands:");
    for line in USAGE {
        info!("{line}");
    }

    let lines = spawn_console_reader()?;
    run_console(&host, &token, &lines);

    host.shutdown();
    info!("=== Chat server stopped ===");
    Ok(())
}
