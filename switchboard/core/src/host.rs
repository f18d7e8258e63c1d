//! Host Orchestrator
//!
//! Owns the client registry and every host-side thread.
//!
//! # Lifecycle
//!
//! ```text
//! launch          provision all -> fork all -> open creators -> receivers
//! await_handshake all `ready` -> all `listening` (bounded waits)
//! start_services  router thread + inactivity monitor thread
//! handle_line     operator commands until `quit`
//! shutdown        cancel -> join -> SIGTERM/SIGKILL clients -> release resources
//! ```
//!
//! Forking happens before any host thread exists, so each child starts
//! from a single-threaded copy of the process.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::client;
use crate::config::{ConfigError, HostConfig};
use crate::console::{self, Command, CommandError};
use crate::context::HostContext;
use crate::messages::{ClientId, Message, SystemSignal, HOST_ID};
use crate::monitor::InactivityMonitor;
use crate::process;
use crate::receiver::run_receiver;
use crate::registry::Connection;
use crate::router::{RouteReport, Router};
use crate::shutdown::ShutdownToken;
use crate::transport::{self, Ownership, TransportError};

/// Errors that abort host startup
#[derive(Debug, Error)]
pub enum HostError {
    /// The configuration cannot be used
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Creating a connection's resources failed
    #[error("failed to create transport resources for client {id}: {source}")]
    Provision {
        /// Affected client
        id: ClientId,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// `fork` failed
    #[error("failed to fork client {id}: {source}")]
    Fork {
        /// Client that was being started
        id: ClientId,
        /// OS error
        #[source]
        source: Errno,
    },

    /// Opening the host endpoint failed
    #[error("failed to open host endpoint for client {id}: {source}")]
    Open {
        /// Affected client
        id: ClientId,
        /// Transport failure
        #[source]
        source: TransportError,
    },

    /// A host thread could not be started
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// OS error
        #[source]
        source: io::Error,
    },
}

/// Result of the two-phase readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReport {
    /// Every client sent `ready` in time
    pub ready: bool,
    /// Every client sent `listening` in time
    pub listening: bool,
}

/// What the console loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleOutcome {
    /// Keep reading
    Continue,
    /// Shut down
    Quit,
}

/// The running host
pub struct Host {
    config: HostConfig,
    ctx: HostContext,
    router: Router,
    receivers: Vec<JoinHandle<()>>,
    services: Vec<JoinHandle<()>>,
    stopped: bool,
}

fn spawn_named<F>(name: String, f: F) -> Result<JoinHandle<()>, HostError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| HostError::Spawn { name, source })
}

/// Abandon a partial startup: stop whatever was forked
fn abort_children(pids: &[Pid], config: &HostConfig) {
    if !pids.is_empty() {
        tracing::warn!(count = pids.len(), "Startup failed, stopping forked clients");
        process::terminate_all(pids, config.termination_grace);
    }
}

impl Host {
    /// Provision, fork and connect every client
    ///
    /// Must be called before the process starts any other thread. The
    /// caller decides which signals are blocked; children unblock
    /// `SIGINT`/`SIGTERM`.
    ///
    /// # Errors
    ///
    /// Returns the first startup failure. Already-forked clients are
    /// terminated and all created resources are removed.
    pub fn launch(config: HostConfig, token: ShutdownToken) -> Result<Self, HostError> {
        config.validate()?;
        let transport_config = &config.transport;

        tracing::info!(
            transport = %transport_config.kind,
            clients = config.clients,
            namespace = %transport_config.namespace,
            "Starting host"
        );

        let mut owners: Vec<Ownership> = Vec::new();
        for index in 0..config.clients {
            let id = ClientId::new(index);
            let owner = transport::provision(id, transport_config)
                .map_err(|source| HostError::Provision { id, source })?;
            owners.push(owner);
        }

        let mut pids = Vec::new();
        for index in 0..config.clients {
            let id = ClientId::new(index);
            let child_config = transport_config.clone();
            match process::spawn_child(move || {
                client::run_client(id, &child_config, ShutdownToken::new())
            }) {
                Ok(pid) => {
                    tracing::debug!(client_id = %id, pid = pid.as_raw(), "Forked client");
                    pids.push(pid);
                }
                Err(source) => {
                    abort_children(&pids, &config);
                    return Err(HostError::Fork { id, source });
                }
            }
        }

        let ctx = HostContext::new(token);
        let mut connections = Vec::new();
        for (owner, &pid) in owners.into_iter().zip(&pids) {
            let id = owner.id();
            match transport::open_creator(owner, transport_config, ctx.token.clone()) {
                Ok(endpoint) => connections.push((Arc::new(Connection::new(endpoint)), pid)),
                Err(source) => {
                    abort_children(&pids, &config);
                    return Err(HostError::Open { id, source });
                }
            }
        }

        let mut host = Self {
            router: Router::new(ctx.clone()),
            ctx,
            config,
            receivers: Vec::new(),
            services: Vec::new(),
            stopped: false,
        };
        host.start_receivers(connections, |name, f| spawn_named(name, f))?;

        Ok(host)
    }

    /// Register each client and start its receiver thread
    ///
    /// If a thread cannot be started, clients after it were forked but never
    /// registered, so they are stopped here; registered ones are left to
    /// [`Host::shutdown`].
    fn start_receivers<S>(
        &mut self,
        connections: Vec<(Arc<Connection>, Pid)>,
        mut spawn: S,
    ) -> Result<(), HostError>
    where
        S: FnMut(String, Box<dyn FnOnce() + Send>) -> Result<JoinHandle<()>, HostError>,
    {
        let pids: Vec<Pid> = connections.iter().map(|&(_, pid)| pid).collect();

        for (index, (connection, pid)) in connections.into_iter().enumerate() {
            let id = connection.id();
            self.ctx.registry.register(Arc::clone(&connection), Some(pid));
            let ctx = self.ctx.clone();
            match spawn(
                format!("receiver-{id}"),
                Box::new(move || run_receiver(&ctx, &connection)),
            ) {
                Ok(handle) => self.receivers.push(handle),
                Err(e) => {
                    abort_children(&pids[index + 1..], &self.config);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Wait for every client to report `ready`, then `listening`
    ///
    /// Each phase is bounded by the handshake timeout; a timeout is logged
    /// and startup continues.
    pub fn await_handshake(&self) -> HandshakeReport {
        let timeout = self.config.handshake_timeout;
        let registry = &self.ctx.registry;

        let ready = registry.wait_for_phase(SystemSignal::Ready, timeout);
        if ready {
            tracing::info!("All clients ready");
        } else {
            tracing::warn!(
                timeout_ms = timeout.as_millis(),
                "Warning: not all clients ready within {} seconds",
                timeout.as_secs()
            );
        }

        let listening = registry.wait_for_phase(SystemSignal::Listening, timeout);
        if listening {
            tracing::info!("All clients started listening");
        } else {
            tracing::warn!(
                timeout_ms = timeout.as_millis(),
                "Warning: not all clients started listening within {} seconds",
                timeout.as_secs()
            );
        }

        HandshakeReport { ready, listening }
    }

    /// Start the router and the inactivity monitor
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Spawn`] if a thread cannot be started.
    pub fn start_services(&mut self) -> Result<(), HostError> {
        let router = self.router.clone();
        let tick = self.config.router_tick;
        self.services
            .push(spawn_named("router".to_string(), move || router.run(tick))?);

        let monitor = InactivityMonitor::new(
            self.ctx.clone(),
            self.config.inactivity_timeout,
            self.config.termination_grace,
        );
        let tick = self.config.monitor_tick;
        self.services
            .push(spawn_named("monitor".to_string(), move || monitor.run(tick))?);

        Ok(())
    }

    /// Execute one operator input line
    pub fn handle_line(&self, line: &str) -> ConsoleOutcome {
        match console::parse(line, self.config.clients) {
            Ok(None) => ConsoleOutcome::Continue,
            Ok(Some(Command::Quit)) => {
                tracing::info!("Server shutting down...");
                ConsoleOutcome::Quit
            }
            Ok(Some(Command::Broadcast(text))) => {
                tracing::info!("Host broadcast: {text}");
                self.inject(&Message::broadcast(HOST_ID, &text));
                ConsoleOutcome::Continue
            }
            Ok(Some(Command::Direct { target, text })) => {
                tracing::info!("Host private to {target}: {text}");
                self.inject(&Message::direct(HOST_ID, target, &text));
                ConsoleOutcome::Continue
            }
            Err(CommandError::Unknown) => {
                tracing::warn!("Unknown command. Use 'all:<msg>' or 'to <id>:<msg>'");
                ConsoleOutcome::Continue
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rejected command");
                ConsoleOutcome::Continue
            }
        }
    }

    /// Deliver a message right away, bypassing the inbound queue
    pub fn inject(&self, msg: &Message) -> RouteReport {
        self.router.route(msg)
    }

    /// Shared host state
    #[must_use]
    pub fn context(&self) -> &HostContext {
        &self.ctx
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Stop every thread and client and release all resources
    ///
    /// Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        tracing::info!("Waiting for threads to finish...");
        self.ctx.token.cancel();
        for handle in self.services.drain(..).chain(self.receivers.drain(..)) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                tracing::error!(thread = %name, "Host thread panicked");
            }
        }

        tracing::info!("Terminating clients...");
        let pids: Vec<Pid> = self
            .ctx
            .registry
            .pids()
            .into_iter()
            .map(|(_, pid)| pid)
            .collect();
        process::terminate_all(&pids, self.config.termination_grace);

        let released = self.ctx.registry.clear();
        tracing::debug!(count = released.len(), "Released client connections");
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessTransport;
    use nix::sys::signal;
    use std::process::Command;
    use std::time::Duration;

    fn alive(pid: Pid) -> bool {
        signal::kill(pid, None).is_ok()
    }

    fn sleeping_child() -> Pid {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        Pid::from_raw(i32::try_from(child.id()).unwrap())
    }

    fn idle_host(token: ShutdownToken) -> Host {
        let mut config = HostConfig::default();
        config.termination_grace = Duration::from_millis(500);
        let ctx = HostContext::new(token);
        Host {
            router: Router::new(ctx.clone()),
            ctx,
            config,
            receivers: Vec::new(),
            services: Vec::new(),
            stopped: false,
        }
    }

    #[test]
    fn test_failed_receiver_spawn_stops_unregistered_clients() {
        let token = ShutdownToken::new();
        let mut host = idle_host(token.clone());

        let mut peers = Vec::new();
        let mut connections = Vec::new();
        for index in 0..3 {
            let (creator, joiner) = InProcessTransport::pair(ClientId::new(index), token.clone());
            peers.push(joiner);
            connections.push((Arc::new(Connection::new(Box::new(creator))), sleeping_child()));
        }
        let pids: Vec<Pid> = connections.iter().map(|&(_, pid)| pid).collect();

        let mut calls = 0;
        let result = host.start_receivers(connections, |name, f| {
            calls += 1;
            if calls == 2 {
                return Err(HostError::Spawn {
                    name,
                    source: io::Error::other("thread limit reached"),
                });
            }
            spawn_named(name, f)
        });

        assert!(matches!(result, Err(HostError::Spawn { .. })));
        assert_eq!(host.context().registry.len(), 2);
        assert!(alive(pids[0]));
        assert!(alive(pids[1]));
        assert!(!alive(pids[2]), "unregistered client must be stopped");

        host.shutdown();
        assert!(pids.iter().all(|&pid| !alive(pid)));
        drop(peers);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut host = idle_host(ShutdownToken::new());
        host.shutdown();
        host.shutdown();
        assert!(host.context().token.is_cancelled());
        assert!(host.context().registry.is_empty());
    }
}
