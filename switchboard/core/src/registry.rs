//! Client Registry - Host-Side Connection State
//!
//! Maps each client id to its host endpoint, process id, last activity and
//! handshake flags. Shared by the receivers (which stamp activity and set
//! flags), the router (which reads endpoints), the monitor (which evicts)
//! and the orchestrator (which waits on the handshake).
//!
//! # Architecture
//!
//! ```text
//!                       ClientRegistry
//!              ┌────────────────────────────────────┐
//!              │ Mutex<BTreeMap<ClientId, Entry>>   │
//!              │ Condvar (handshake flag changes)   │
//!              └───────────────┬────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!  ┌─────▼─────┐        ┌──────▼─────┐        ┌──────▼─────┐
//!  │ receivers │        │   router   │        │  monitor   │
//!  │ touch/flag│        │ snapshots  │        │ stale/evict│
//!  └───────────┘        └────────────┘        └────────────┘
//! ```
//!
//! # Thread Safety
//!
//! One mutex guards the map; no transport I/O happens while it is held.
//! Endpoints are handed out as `Arc<Connection>` snapshots so a slow write
//! never blocks registry updates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::unistd::Pid;
use parking_lot::{Condvar, Mutex};

use crate::messages::{ClientId, Message, SystemSignal};
use crate::transport::{Transport, TransportError};

/// Host endpoint for one client with serialized writes
///
/// Reads come only from that client's receiver; writes may come from the
/// router and the operator console at once, so they pass through a gate.
pub struct Connection {
    transport: Box<dyn Transport>,
    write_gate: Mutex<()>,
}

impl Connection {
    /// Wrap a host endpoint
    #[must_use]
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            write_gate: Mutex::new(()),
        }
    }

    /// Client id of the endpoint
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.transport.id()
    }

    /// Transport mechanism name
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.transport.kind_name()
    }

    /// Receive one record
    ///
    /// # Errors
    ///
    /// See [`Transport::read`].
    pub fn recv(&self) -> Result<Message, TransportError> {
        self.transport.recv()
    }

    /// Send one record, waiting for any other writer first
    ///
    /// # Errors
    ///
    /// See [`Transport::write`].
    pub fn send(&self, msg: &Message) -> Result<(), TransportError> {
        let _gate = self.write_gate.lock();
        self.transport.send(msg)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("kind", &self.kind_name())
            .finish()
    }
}

/// Registry record for one client
#[derive(Debug)]
pub struct ClientEntry {
    /// Host endpoint
    pub connection: Arc<Connection>,
    /// Forked client process, if any
    pub pid: Option<Pid>,
    /// Last time a record arrived from this client
    pub last_activity: Instant,
    /// Client sent `ready`
    pub ready: bool,
    /// Client sent `listening`
    pub listening: bool,
    /// The receiver saw the connection fail
    pub disconnected: bool,
}

impl ClientEntry {
    fn flag(&self, signal: SystemSignal) -> bool {
        match signal {
            SystemSignal::Ready => self.ready,
            SystemSignal::Listening => self.listening,
        }
    }
}

/// Registry of connected clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    entries: Mutex<BTreeMap<ClientId, ClientEntry>>,
    changed: Condvar,
}

impl ClientRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, replacing any entry with the same id
    pub fn register(&self, connection: Arc<Connection>, pid: Option<Pid>) {
        let id = connection.id();
        let entry = ClientEntry {
            connection,
            pid,
            last_activity: Instant::now(),
            ready: false,
            listening: false,
            disconnected: false,
        };
        self.entries.lock().insert(id, entry);
        self.changed.notify_all();
        tracing::debug!(client_id = %id, pid = ?pid, "Client registered");
    }

    /// Stamp activity for `id` at the current time
    pub fn touch(&self, id: ClientId) {
        self.touch_at(id, Instant::now());
    }

    /// Stamp activity for `id` at `now`
    pub fn touch_at(&self, id: ClientId, now: Instant) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.last_activity = now;
        }
    }

    /// Set a handshake flag
    ///
    /// Returns `true` only the first time the flag changes; flags never go
    /// back to `false`.
    pub fn mark_signal(&self, id: ClientId, signal: SystemSignal) -> bool {
        let changed = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&id) {
                Some(entry) if !entry.flag(signal) => {
                    match signal {
                        SystemSignal::Ready => entry.ready = true,
                        SystemSignal::Listening => entry.listening = true,
                    }
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.changed.notify_all();
        }
        changed
    }

    /// Record that the receiver lost the connection
    pub fn mark_disconnected(&self, id: ClientId) {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.disconnected = true;
        }
        self.changed.notify_all();
    }

    /// Block until every registered client has sent `signal`
    ///
    /// Returns `false` if `timeout` elapses first.
    pub fn wait_for_phase(&self, signal: SystemSignal, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if entries.values().all(|e| e.flag(signal)) {
                return true;
            }
            if self.changed.wait_until(&mut entries, deadline).timed_out() {
                return entries.values().all(|e| e.flag(signal));
            }
        }
    }

    /// Whether `id` has sent `signal`
    #[must_use]
    pub fn has_signalled(&self, id: ClientId, signal: SystemSignal) -> bool {
        self.entries.lock().get(&id).is_some_and(|e| e.flag(signal))
    }

    /// Remove a client
    pub fn remove(&self, id: ClientId) -> Option<ClientEntry> {
        let entry = self.entries.lock().remove(&id);
        if entry.is_some() {
            self.changed.notify_all();
            tracing::debug!(client_id = %id, "Client removed from registry");
        }
        entry
    }

    /// Remove every client
    pub fn clear(&self) -> Vec<ClientEntry> {
        let drained = std::mem::take(&mut *self.entries.lock());
        self.changed.notify_all();
        drained.into_values().collect()
    }

    /// Endpoint for one client
    #[must_use]
    pub fn connection(&self, id: ClientId) -> Option<Arc<Connection>> {
        self.entries
            .lock()
            .get(&id)
            .map(|e| Arc::clone(&e.connection))
    }

    /// Snapshot of every endpoint, ordered by id
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.entries
            .lock()
            .values()
            .map(|e| Arc::clone(&e.connection))
            .collect()
    }

    /// Clients idle for longer than `threshold` at `now`
    #[must_use]
    pub fn stale(&self, now: Instant, threshold: Duration) -> Vec<(ClientId, Option<Pid>)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_activity) > threshold)
            .map(|(id, e)| (*id, e.pid))
            .collect()
    }

    /// Process ids of every client that has one
    #[must_use]
    pub fn pids(&self) -> Vec<(ClientId, Pid)> {
        self.entries
            .lock()
            .iter()
            .filter_map(|(id, e)| e.pid.map(|pid| (*id, pid)))
            .collect()
    }

    /// Registered ids, ascending
    #[must_use]
    pub fn ids(&self) -> Vec<ClientId> {
        self.entries.lock().keys().copied().collect()
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: ClientId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of registered clients
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no clients are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
