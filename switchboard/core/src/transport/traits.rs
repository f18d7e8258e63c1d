//! Transport Traits
//!
//! The blocking request/response contract shared by every transport.
//!
//! Each connection has exactly two endpoints: the creator (host side) and
//! the joiner (client side). Both implement [`Transport`]; only the creator
//! holds the [`Ownership`](super::resources::Ownership) that removes the
//! named OS resources on drop.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::messages::{ClientId, Message, MESSAGE_SIZE};

/// Which side of a connection an endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Host side: allocates the resources and removes them on teardown
    Creator,
    /// Client side: attaches to existing resources and detaches on exit
    Joiner,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creator => write!(f, "creator"),
            Self::Joiner => write!(f, "joiner"),
        }
    }
}

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Buffer is not exactly one record long
    #[error("transfer must be exactly {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required size
        expected: usize,
        /// Size that was supplied or received
        actual: usize,
    },

    /// Shutdown was requested while waiting
    #[error("cancelled by shutdown")]
    Cancelled,

    /// The configured deadline elapsed
    #[error("timed out after {0} ms")]
    TimedOut(u64),

    /// The peer closed its end
    #[error("connection closed by peer")]
    Closed,

    /// The named resource never appeared
    #[error("{name} unavailable after {attempts} attempts")]
    Unavailable {
        /// Resource name that was probed
        name: String,
        /// Number of open attempts made
        attempts: u32,
    },

    /// Resource name cannot be used with the OS call
    #[error("invalid resource name: {0}")]
    InvalidName(String),

    /// Unrecoverable OS error
    #[error("{op} failed: {source}")]
    Os {
        /// The failing call
        op: &'static str,
        /// The underlying error
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// Wrap the current `errno`
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::Os {
            op,
            source: io::Error::last_os_error(),
        }
    }

    /// Wrap an `io::Error`
    pub(crate) fn os(op: &'static str, source: io::Error) -> Self {
        Self::Os { op, source }
    }

    /// Whether retrying the logical operation may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Unavailable { .. })
    }
}

/// Check a caller buffer against the record size
pub(crate) fn check_len(actual: usize) -> Result<(), TransportError> {
    if actual == MESSAGE_SIZE {
        Ok(())
    } else {
        Err(TransportError::InvalidLength {
            expected: MESSAGE_SIZE,
            actual,
        })
    }
}

/// Symmetric blocking channel carrying fixed-size records
///
/// `read` and `write` take `&self`: the two directions are independent OS
/// objects, so one thread may read while another writes. Two concurrent
/// writers on the same endpoint are not supported; callers serialize them.
pub trait Transport: Send + Sync {
    /// Connection id this endpoint belongs to
    fn id(&self) -> ClientId;

    /// Creator or joiner
    fn role(&self) -> Role;

    /// Short name of the mechanism, for logs
    fn kind_name(&self) -> &'static str;

    /// Block until `buf.len()` bytes arrive, a timeout, or shutdown
    ///
    /// # Errors
    ///
    /// Fails if `buf` is not exactly [`MESSAGE_SIZE`] bytes, the peer is gone,
    /// the token is cancelled, or the OS reports a fatal error. On success
    /// the whole buffer has been filled.
    fn read(&self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Block until all of `buf` is accepted by the transport
    ///
    /// # Errors
    ///
    /// Fails if `buf` is not exactly [`MESSAGE_SIZE`] bytes, the peer is gone,
    /// the write deadline passes, or the token is cancelled.
    fn write(&self, buf: &[u8]) -> Result<(), TransportError>;

    /// Receive one record
    ///
    /// # Errors
    ///
    /// Same as [`Transport::read`].
    fn recv(&self) -> Result<Message, TransportError> {
        let mut buf = [0u8; MESSAGE_SIZE];
        self.read(&mut buf)?;
        Message::from_bytes(&buf).map_err(|_| TransportError::InvalidLength {
            expected: MESSAGE_SIZE,
            actual: buf.len(),
        })
    }

    /// Send one record
    ///
    /// # Errors
    ///
    /// Same as [`Transport::write`].
    fn send(&self, msg: &Message) -> Result<(), TransportError> {
        self.write(&msg.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_len() {
        assert!(check_len(MESSAGE_SIZE).is_ok());
        assert!(matches!(
            check_len(12),
            Err(TransportError::InvalidLength { expected: MESSAGE_SIZE, actual: 12 })
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::TimedOut(1000).is_transient());
        assert!(!TransportError::Closed.is_transient());
        assert!(!TransportError::Cancelled.is_transient());
        let err = TransportError::os("read", io::Error::from_raw_os_error(libc::EBADF));
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with("read failed"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Creator.to_string(), "creator");
        assert_eq!(Role::Joiner.to_string(), "joiner");
    }
}
