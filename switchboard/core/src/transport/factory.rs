//! Transport Factory
//!
//! Factory functions for creating transport endpoints from a
//! [`TransportConfig`]. Callers never name a concrete transport type.
//!
//! Creating a connection is split in two so the host can allocate every
//! resource before it forks its clients:
//!
//! 1. [`provision`] creates the named OS objects and returns an [`Ownership`]
//! 2. [`open_creator`] consumes that ownership and opens the host endpoint
//!
//! Clients call [`open_joiner`], which waits for the names to appear.
//!
//! # Example
//!
//! ```ignore
//! let owner = provision(ClientId::new(0), &config)?;
//! // fork the client here; it calls open_joiner(ClientId::new(0), ...)
//! let host_end = open_creator(owner, &config, token)?;
//! ```

use crate::messages::ClientId;
use crate::shutdown::ShutdownToken;

use super::config::{TransportConfig, TransportKind};
use super::fifo::{self, FifoTransport};
use super::mqueue::{self, MqTransport};
use super::resources::{Ownership, ResourceNames};
use super::shm::{self, ShmTransport};
use super::traits::{Transport, TransportError};

/// Create the OS resources for connection `id`
///
/// Stale resources with the same names (left by a crashed run) are removed
/// first.
///
/// # Errors
///
/// Returns an error if the names are invalid or the OS refuses to create
/// the objects.
pub fn provision(id: ClientId, config: &TransportConfig) -> Result<Ownership, TransportError> {
    let names = ResourceNames::derive(config.kind, id, config)?;
    match config.kind {
        TransportKind::Fifo => fifo::provision(&names)?,
        TransportKind::Mq => mqueue::provision(&names)?,
        TransportKind::Shm => shm::provision(&names)?,
    }
    Ok(Ownership::new(id, names))
}

/// Open the host endpoint on provisioned resources
///
/// The returned transport removes the resources when dropped.
///
/// # Errors
///
/// Returns an error if the endpoint cannot be opened. The resources are
/// removed in that case too.
pub fn open_creator(
    ownership: Ownership,
    config: &TransportConfig,
    token: ShutdownToken,
) -> Result<Box<dyn Transport>, TransportError> {
    let id = ownership.id();
    let names = ownership.names().clone();
    open(id, &names, Some(ownership), config, token)
}

/// Open the client endpoint, waiting for the host to create the resources
///
/// # Errors
///
/// Returns [`TransportError::Unavailable`] if the resources never appear,
/// or [`TransportError::Cancelled`] if the token fires first.
pub fn open_joiner(
    id: ClientId,
    config: &TransportConfig,
    token: ShutdownToken,
) -> Result<Box<dyn Transport>, TransportError> {
    let names = ResourceNames::derive(config.kind, id, config)?;
    open(id, &names, None, config, token)
}

/// Provision and open a creator endpoint in one step
///
/// # Errors
///
/// See [`provision`] and [`open_creator`].
pub fn create(
    id: ClientId,
    config: &TransportConfig,
    token: ShutdownToken,
) -> Result<Box<dyn Transport>, TransportError> {
    let ownership = provision(id, config)?;
    open_creator(ownership, config, token)
}

fn open(
    id: ClientId,
    names: &ResourceNames,
    owner: Option<Ownership>,
    config: &TransportConfig,
    token: ShutdownToken,
) -> Result<Box<dyn Transport>, TransportError> {
    Ok(match names.kind() {
        TransportKind::Fifo => Box::new(FifoTransport::open(id, names, owner, config, token)?),
        TransportKind::Mq => Box::new(MqTransport::open(id, names, owner, config, token)?),
        TransportKind::Shm => Box::new(ShmTransport::open(id, names, owner, config, token)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::traits::Role;

    fn test_config(kind: TransportKind, tag: &str) -> (TransportConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = TransportConfig {
            kind,
            namespace: format!("sbf_{tag}_{}", std::process::id()),
            fifo_dir: dir.path().to_path_buf(),
            poll_interval_ms: 20,
            open_attempts: 5,
            open_retry_ms: 10,
            ..Default::default()
        };
        (config, dir)
    }

    #[test]
    fn test_provision_creates_and_drop_removes() {
        for kind in TransportKind::ALL {
            let (config, _dir) = test_config(kind, "prov");
            let owner = provision(ClientId::new(0), &config).unwrap();
            let names = owner.names().clone();
            assert!(names.exists(), "{kind} resources should exist");
            drop(owner);
            assert!(!names.exists(), "{kind} resources should be removed");
        }
    }

    #[test]
    fn test_provision_replaces_stale_resources() {
        for kind in TransportKind::ALL {
            let (config, _dir) = test_config(kind, "stale");
            let first = provision(ClientId::new(1), &config).unwrap();
            // A crashed host would never have dropped this
            std::mem::forget(first);
            let second = provision(ClientId::new(1), &config).unwrap();
            assert!(second.names().exists());
        }
    }

    #[test]
    fn test_joiner_gives_up_without_creator() {
        for kind in TransportKind::ALL {
            let (config, _dir) = test_config(kind, "absent");
            let result = open_joiner(ClientId::new(7), &config, ShutdownToken::new());
            assert!(
                matches!(result, Err(TransportError::Unavailable { attempts: 5, .. })),
                "{kind} joiner should report unavailable"
            );
        }
    }

    #[test]
    fn test_open_creator_reports_role() {
        let (config, _dir) = test_config(TransportKind::Shm, "role");
        let token = ShutdownToken::new();
        let host = create(ClientId::new(3), &config, token.clone()).unwrap();
        assert_eq!(host.role(), Role::Creator);
        assert_eq!(host.id(), ClientId::new(3));
        assert_eq!(host.kind_name(), "shm");

        let client = open_joiner(ClientId::new(3), &config, token).unwrap();
        assert_eq!(client.role(), Role::Joiner);
        drop(client);
        drop(host);
    }
}
