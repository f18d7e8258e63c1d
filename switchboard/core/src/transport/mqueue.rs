//! Message Queue Transport
//!
//! Two POSIX message queues per connection, one per direction, each sized
//! to hold exactly one record (`mq_maxmsg = 1`, `mq_msgsize = MESSAGE_SIZE`).
//!
//! Reads and writes use `mq_timedreceive`/`mq_timedsend` with a one-cycle
//! deadline, looped until success, shutdown, or the call deadline.

use std::ffi::CString;
use std::io;

use crate::messages::{ClientId, MESSAGE_SIZE};
use crate::shutdown::ShutdownToken;

use super::config::TransportConfig;
use super::resources::{Ownership, ResourceNames};
use super::traits::{check_len, Role, Transport, TransportError};
use super::wait::{is_missing, open_with_retry, realtime_deadline, CallDeadline};

const QUEUE_DEPTH: libc::c_long = 1;

/// Owned queue descriptor
#[derive(Debug)]
struct Queue(libc::mqd_t);

impl Queue {
    fn open(name: &CString, flags: libc::c_int) -> io::Result<Self> {
        // SAFETY: `name` is a valid NUL-terminated string.
        let mqd = unsafe { libc::mq_open(name.as_ptr(), flags) };
        if mqd == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self(mqd))
        }
    }

    fn create(name: &CString) -> Result<Self, TransportError> {
        // SAFETY: mq_attr is plain data; zeroed is a valid starting value.
        let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
        attr.mq_maxmsg = QUEUE_DEPTH;
        attr.mq_msgsize = MESSAGE_SIZE as libc::c_long;

        // SAFETY: `name` is NUL-terminated and `attr` outlives the call.
        let mqd = unsafe {
            libc::mq_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
                &mut attr as *mut libc::mq_attr,
            )
        };
        if mqd == -1 {
            Err(TransportError::last_os("mq_open(O_CREAT)"))
        } else {
            Ok(Self(mqd))
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned and closed exactly once.
        unsafe {
            libc::mq_close(self.0);
        }
    }
}

/// Create both queues, replacing stale ones
pub(crate) fn provision(names: &ResourceNames) -> Result<(), TransportError> {
    let ResourceNames::Mq {
        client_to_host,
        host_to_client,
    } = names
    else {
        return Err(TransportError::InvalidName(names.to_string()));
    };

    names.remove();
    for name in [client_to_host, host_to_client] {
        drop(Queue::create(name)?);
    }
    tracing::debug!(names = %names, "Created message queues");
    Ok(())
}

/// Message queue endpoint
pub struct MqTransport {
    id: ClientId,
    role: Role,
    inbound: Queue,
    outbound: Queue,
    config: TransportConfig,
    token: ShutdownToken,
    /// Held by the creator only; must stay the last field
    _owner: Option<Ownership>,
}

impl MqTransport {
    /// Open an endpoint on provisioned queues
    ///
    /// The joiner retries while the queues do not exist yet.
    ///
    /// # Errors
    ///
    /// Fails if the queues never appear or cannot be opened.
    pub(crate) fn open(
        id: ClientId,
        names: &ResourceNames,
        owner: Option<Ownership>,
        config: &TransportConfig,
        token: ShutdownToken,
    ) -> Result<Self, TransportError> {
        let ResourceNames::Mq {
            client_to_host,
            host_to_client,
        } = names
        else {
            return Err(TransportError::InvalidName(names.to_string()));
        };

        let role = if owner.is_some() {
            Role::Creator
        } else {
            Role::Joiner
        };
        let (read_name, write_name) = match role {
            Role::Creator => (client_to_host, host_to_client),
            Role::Joiner => (host_to_client, client_to_host),
        };

        let open = |name: &CString, flags| {
            open_with_retry(
                &name.to_string_lossy(),
                config,
                &token,
                || Queue::open(name, flags),
                is_missing,
            )
        };
        let inbound = open(read_name, libc::O_RDONLY)?;
        let outbound = open(write_name, libc::O_WRONLY)?;

        tracing::debug!(client_id = %id, role = %role, "Message queues opened");

        Ok(Self {
            id,
            role,
            inbound,
            outbound,
            config: config.clone(),
            token,
            _owner: owner,
        })
    }
}

impl Transport for MqTransport {
    fn id(&self) -> ClientId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn kind_name(&self) -> &'static str {
        "mq"
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let deadline = CallDeadline::starting_now(self.config.read_timeout());

        loop {
            let ts = realtime_deadline(self.config.poll_interval());
            // SAFETY: `buf` is valid for `buf.len()` bytes, which equals the
            // queue's mq_msgsize; `ts` outlives the call.
            let received = unsafe {
                libc::mq_timedreceive(
                    self.inbound.0,
                    buf.as_mut_ptr().cast::<libc::c_char>(),
                    buf.len(),
                    std::ptr::null_mut(),
                    &ts,
                )
            };

            if received >= 0 {
                let received = received.unsigned_abs();
                return if received == MESSAGE_SIZE {
                    Ok(())
                } else {
                    Err(TransportError::InvalidLength {
                        expected: MESSAGE_SIZE,
                        actual: received,
                    })
                };
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => deadline.after_tick(&self.token)?,
                Some(libc::EINTR) => {}
                _ => return Err(TransportError::os("mq_timedreceive", err)),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let deadline = CallDeadline::starting_now(self.config.write_timeout());

        loop {
            let ts = realtime_deadline(self.config.poll_interval());
            // SAFETY: `buf` is valid for `buf.len()` bytes; `ts` outlives the call.
            let rv = unsafe {
                libc::mq_timedsend(
                    self.outbound.0,
                    buf.as_ptr().cast::<libc::c_char>(),
                    buf.len(),
                    0,
                    &ts,
                )
            };
            if rv == 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => deadline.after_tick(&self.token)?,
                Some(libc::EINTR) => {}
                _ => return Err(TransportError::os("mq_timedsend", err)),
            }
        }
    }
}
