//! Transport Layer for Host-Client IPC
//!
//! Provides one blocking contract over three local IPC mechanisms:
//! - `fifo`: a pair of named pipes
//! - `mq`: a pair of POSIX message queues
//! - `shm`: a shared memory segment with semaphore-guarded mailboxes
//!
//! # Design Philosophy
//!
//! Every call moves exactly one fixed-size record. Endpoints are created
//! through the [`factory`], which keeps the host (creator) and clients
//! (joiners) ignorant of the mechanism in use. All waits are bounded by
//! the poll interval and observe a [`ShutdownToken`](crate::ShutdownToken).
//!
//! # Security
//!
//! - Every named object is created with 0600 permissions
//! - Stale objects from an earlier run are removed before creation
//! - Only the creator removes names, and only once

pub mod config;
pub mod factory;
mod fifo;
pub mod in_process;
mod mqueue;
pub mod resources;
mod shm;
pub mod traits;
mod wait;

// Re-exports for convenience
pub use config::{TransportConfig, TransportKind};
pub use factory::{create, open_creator, open_joiner, provision};
pub use fifo::FifoTransport;
pub use in_process::InProcessTransport;
pub use mqueue::MqTransport;
pub use resources::{Ownership, ResourceNames};
pub use shm::ShmTransport;
pub use traits::{Role, Transport, TransportError};
