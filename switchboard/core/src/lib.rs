//! Switchboard Core - Multi-Process Chat over Local IPC
//!
//! A host process forks N client processes and relays fixed-size chat
//! records between them over one of three interchangeable local IPC
//! transports: named pipes, POSIX message queues, or shared memory guarded
//! by semaphores.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────── HOST ─────────────────────────────────┐
//! │                                                                       │
//! │  console ──► Host::handle_line ──► Router::route ──┐                  │
//! │                                                     │                  │
//! │  receiver-0 ─┐                                      ▼                  │
//! │  receiver-1 ─┼─► InboundQueue ──► router thread ──► Connection::send   │
//! │  receiver-2 ─┘        ▲                                  │             │
//! │       │               │           monitor thread         │             │
//! │       ▼               │           (reap / evict)         │             │
//! │  ClientRegistry ◄─────┴──────────────────────────────────┘             │
//! └───────┬──────────────────────────────────────────────────┬────────────┘
//!         │ Transport (creator)                               │
//! ┌───────▼────────┐  ┌────────────────┐  ┌────────────────┐  │
//! │   client 0     │  │   client 1     │  │   client 2     │◄─┘
//! │ (joiner, fork) │  │ (joiner, fork) │  │ (joiner, fork) │
//! └────────────────┘  └────────────────┘  └────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Host`]: Startup, handshake, console commands and shutdown
//! - [`Message`]: The 272-byte record every transport carries
//! - [`Transport`]: The blocking read/write contract
//! - [`ClientRegistry`]: Per-client endpoint, pid, activity and handshake state
//! - [`ShutdownToken`]: Cooperative cancellation observed by every wait
//!
//! # Quick Start
//!
//! ```ignore
//! use switchboard_core::{Host, HostConfig, ShutdownToken};
//!
//! let mut host = Host::launch(HostConfig::default(), ShutdownToken::new())?;
//! host.await_handshake();
//! host.start_services()?;
//! host.handle_line("all:hello");
//! host.shutdown();
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: Message record and wire layout
//! - [`transport`]: IPC transports, resource naming and ownership
//! - [`registry`]: Client registry
//! - [`queue`]: Inbound queue between receivers and router
//! - [`router`]: Broadcast and direct delivery
//! - [`monitor`]: Inactivity eviction and process reaping
//! - [`receiver`]: Per-client receive loop
//! - [`client`]: What each forked client runs
//! - [`console`]: Operator command parsing
//! - [`host`]: The orchestrator
//! - [`process`]: Fork, signal and reap
//! - [`config`]: TOML, environment and CLI configuration
//! - [`logging`]: Console and file log setup

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod console;
pub mod context;
pub mod host;
pub mod logging;
pub mod messages;
pub mod monitor;
pub mod process;
pub mod queue;
pub mod receiver;
pub mod registry;
pub mod router;
pub mod shutdown;
pub mod transport;

// Re-exports for convenience
pub use context::HostContext;
pub use host::{ConsoleOutcome, HandshakeReport, Host, HostError};
pub use messages::{
    ClientId, Message, SystemSignal, Target, WireError, HOST_ID, MESSAGE_SIZE, TARGET_BROADCAST,
    TARGET_SYSTEM, TEXT_CAPACITY,
};
pub use monitor::{InactivityMonitor, MonitorReport};
pub use queue::InboundQueue;
pub use registry::{ClientEntry, ClientRegistry, Connection};
pub use router::{RouteReport, Router};
pub use shutdown::ShutdownToken;
pub use transport::{
    InProcessTransport, Ownership, ResourceNames, Role, Transport, TransportConfig,
    TransportError, TransportKind,
};

// Console exports
pub use console::{Command, CommandError};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, HostConfig, SwitchboardToml,
};

// Logging exports
pub use logging::{init_logging, LoggingError};
