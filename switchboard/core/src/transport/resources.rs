//! Resource Naming and Ownership
//!
//! Every OS object backing a connection has a name derived from the
//! transport kind, the namespace and the client id:
//!
//! | kind | names                                                  |
//! |------|--------------------------------------------------------|
//! | fifo | `<fifo_dir>/<ns>_fifo_c2h_<id>`, `<fifo_dir>/<ns>_fifo_h2c_<id>` |
//! | mq   | `/<ns>_mq_c2h_<id>`, `/<ns>_mq_h2c_<id>`               |
//! | shm  | `/<ns>_shm_<id>`                                       |
//!
//! [`Ownership`] is the creator capability: whoever holds it removes the
//! names when it is dropped. Transports store it as their last field so
//! local handles are closed before the names disappear.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::messages::ClientId;

use super::config::{TransportConfig, TransportKind};
use super::traits::TransportError;

/// Names of the OS objects behind one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceNames {
    /// Two named pipes
    Fifo {
        /// Client to host pipe
        client_to_host: PathBuf,
        /// Host to client pipe
        host_to_client: PathBuf,
    },
    /// Two message queues
    Mq {
        /// Client to host queue
        client_to_host: CString,
        /// Host to client queue
        host_to_client: CString,
    },
    /// One shared memory object
    Shm {
        /// Segment name
        segment: CString,
    },
}

/// POSIX IPC names allow exactly one leading slash
fn ipc_name(namespace: &str, rest: &str) -> Result<CString, TransportError> {
    let name = format!("/{}_{rest}", namespace.replace('/', "_"));
    CString::new(name.clone()).map_err(|_| TransportError::InvalidName(name))
}

/// Treat "already gone" as success
fn ignore_missing(result: io::Result<()>, name: &str) {
    match result {
        Ok(()) => tracing::debug!(name = %name, "Removed resource"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(name = %name, error = %e, "Failed to remove resource"),
    }
}

fn unlink_mq(name: &CString) -> io::Result<()> {
    // SAFETY: `name` is a valid NUL-terminated string.
    if unsafe { libc::mq_unlink(name.as_ptr()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn unlink_shm(name: &CString) -> io::Result<()> {
    // SAFETY: `name` is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(name.as_ptr()) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn mq_present(name: &CString) -> bool {
    // SAFETY: `name` is a valid NUL-terminated string; the descriptor is
    // closed immediately.
    unsafe {
        let mqd = libc::mq_open(name.as_ptr(), libc::O_RDONLY);
        if mqd == -1 {
            return io::Error::last_os_error().raw_os_error() != Some(libc::ENOENT);
        }
        libc::mq_close(mqd);
    }
    true
}

fn shm_present(name: &CString) -> bool {
    // SAFETY: `name` is a valid NUL-terminated string; the descriptor is
    // closed immediately.
    unsafe {
        let fd = libc::shm_open(name.as_ptr(), libc::O_RDONLY, 0);
        if fd == -1 {
            return io::Error::last_os_error().raw_os_error() != Some(libc::ENOENT);
        }
        libc::close(fd);
    }
    true
}

impl ResourceNames {
    /// Derive the names for a connection
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidName`] if the namespace contains a NUL byte.
    pub fn derive(
        kind: TransportKind,
        id: ClientId,
        config: &TransportConfig,
    ) -> Result<Self, TransportError> {
        let ns = config.namespace.as_str();
        Ok(match kind {
            TransportKind::Fifo => Self::Fifo {
                client_to_host: config.fifo_dir.join(format!("{ns}_fifo_c2h_{id}")),
                host_to_client: config.fifo_dir.join(format!("{ns}_fifo_h2c_{id}")),
            },
            TransportKind::Mq => Self::Mq {
                client_to_host: ipc_name(ns, &format!("mq_c2h_{id}"))?,
                host_to_client: ipc_name(ns, &format!("mq_h2c_{id}"))?,
            },
            TransportKind::Shm => Self::Shm {
                segment: ipc_name(ns, &format!("shm_{id}"))?,
            },
        })
    }

    /// Transport kind these names belong to
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Fifo { .. } => TransportKind::Fifo,
            Self::Mq { .. } => TransportKind::Mq,
            Self::Shm { .. } => TransportKind::Shm,
        }
    }

    /// Whether any of the names is still present
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Self::Fifo {
                client_to_host,
                host_to_client,
            } => client_to_host.symlink_metadata().is_ok() || host_to_client.symlink_metadata().is_ok(),
            Self::Mq {
                client_to_host,
                host_to_client,
            } => mq_present(client_to_host) || mq_present(host_to_client),
            Self::Shm { segment } => shm_present(segment),
        }
    }

    /// Remove every name, ignoring ones that are already gone
    pub fn remove(&self) {
        match self {
            Self::Fifo {
                client_to_host,
                host_to_client,
            } => {
                for path in [client_to_host, host_to_client] {
                    ignore_missing(std::fs::remove_file(path), &path.display().to_string());
                }
            }
            Self::Mq {
                client_to_host,
                host_to_client,
            } => {
                for name in [client_to_host, host_to_client] {
                    ignore_missing(unlink_mq(name), &name.to_string_lossy());
                }
            }
            Self::Shm { segment } => {
                ignore_missing(unlink_shm(segment), &segment.to_string_lossy());
            }
        }
    }
}

impl fmt::Display for ResourceNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo {
                client_to_host,
                host_to_client,
            } => write!(
                f,
                "{}, {}",
                client_to_host.display(),
                host_to_client.display()
            ),
            Self::Mq {
                client_to_host,
                host_to_client,
            } => write!(
                f,
                "{}, {}",
                client_to_host.to_string_lossy(),
                host_to_client.to_string_lossy()
            ),
            Self::Shm { segment } => write!(f, "{}", segment.to_string_lossy()),
        }
    }
}

/// Creator capability for one connection's resources
///
/// Produced by [`provision`](super::factory::provision). Dropping it
/// removes the names; it is never cloned, so exactly one value can do so.
#[derive(Debug)]
pub struct Ownership {
    id: ClientId,
    names: ResourceNames,
}

impl Ownership {
    pub(crate) fn new(id: ClientId, names: ResourceNames) -> Self {
        Self { id, names }
    }

    /// Connection the resources belong to
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The owned names
    #[must_use]
    pub fn names(&self) -> &ResourceNames {
        &self.names
    }
}

impl Drop for Ownership {
    fn drop(&mut self) {
        self.names.remove();
        tracing::debug!(client_id = %self.id, names = %self.names, "Released transport resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_names_are_deterministic_per_id() {
        let config = TransportConfig::default();
        let a = ResourceNames::derive(TransportKind::Mq, ClientId::new(3), &config).unwrap();
        let b = ResourceNames::derive(TransportKind::Mq, ClientId::new(3), &config).unwrap();
        let c = ResourceNames::derive(TransportKind::Mq, ClientId::new(4), &config).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "/chat_mq_c2h_3, /chat_mq_h2c_3");
    }

    #[test]
    fn test_namespace_slashes_are_flattened() {
        let config = TransportConfig {
            namespace: "a/b".to_string(),
            ..Default::default()
        };
        let names = ResourceNames::derive(TransportKind::Shm, ClientId::new(0), &config).unwrap();
        assert_eq!(names.to_string(), "/a_b_shm_0");
    }

    #[test]
    fn test_nul_in_namespace_is_rejected() {
        let config = TransportConfig {
            namespace: "bad\0ns".to_string(),
            ..Default::default()
        };
        let result = ResourceNames::derive(TransportKind::Shm, ClientId::new(0), &config);
        assert!(matches!(result, Err(TransportError::InvalidName(_))));
    }

    #[test]
    fn test_fifo_names_live_in_fifo_dir() {
        let dir = TempDir::new().unwrap();
        let config = TransportConfig {
            fifo_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let names = ResourceNames::derive(TransportKind::Fifo, ClientId::new(1), &config).unwrap();
        match &names {
            ResourceNames::Fifo {
                client_to_host,
                host_to_client,
            } => {
                assert_eq!(client_to_host, &dir.path().join("chat_fifo_c2h_1"));
                assert_eq!(host_to_client, &dir.path().join("chat_fifo_h2c_1"));
            }
            other => panic!("expected fifo names, got {other:?}"),
        }
        assert!(!names.exists());
    }

    #[test]
    fn test_ownership_drop_removes_files() {
        let dir = TempDir::new().unwrap();
        let config = TransportConfig {
            fifo_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let names = ResourceNames::derive(TransportKind::Fifo, ClientId::new(0), &config).unwrap();
        if let ResourceNames::Fifo { client_to_host, .. } = &names {
            std::fs::write(client_to_host, b"").unwrap();
        }
        assert!(names.exists());

        drop(Ownership::new(ClientId::new(0), names.clone()));
        assert!(!names.exists());
    }
}
