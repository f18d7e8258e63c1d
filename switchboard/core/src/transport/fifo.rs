//! Named Pipe Transport
//!
//! Two unidirectional FIFOs per connection: `c2h` (client to host) and
//! `h2c` (host to client).
//!
//! Both ends are opened with `O_NONBLOCK` so that a missing peer shows up
//! as `ENOENT`/`ENXIO` instead of hanging in `open(2)`; opening is retried
//! until the peer appears. Once connected the write side is switched back
//! to blocking mode. Reads keep the non-blocking descriptor and wait with
//! `poll(2)` one cycle at a time so the shutdown token is observed even when
//! no data arrives. Writes wait for `POLLOUT` the same way before writing,
//! so a client that stops reading cannot stall the host past the write
//! timeout or shutdown.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::sys::stat::Mode;

use crate::messages::ClientId;
use crate::shutdown::ShutdownToken;

use super::config::TransportConfig;
use super::resources::{Ownership, ResourceNames};
use super::traits::{check_len, Role, Transport, TransportError};
use super::wait::{open_with_retry, CallDeadline};

/// Named pipe endpoint
pub struct FifoTransport {
    id: ClientId,
    role: Role,
    reader: File,
    writer: File,
    config: TransportConfig,
    token: ShutdownToken,
    /// Held by the creator only; must stay the last field
    _owner: Option<Ownership>,
}

/// `ENOENT` (not created yet) or `ENXIO` (no reader on the other end yet)
fn peer_missing(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::ENOENT | libc::ENXIO))
}

fn open_end(
    path: &Path,
    write: bool,
    config: &TransportConfig,
    token: &ShutdownToken,
) -> Result<File, TransportError> {
    open_with_retry(
        &path.display().to_string(),
        config,
        token,
        || {
            OpenOptions::new()
                .read(!write)
                .write(write)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
        },
        peer_missing,
    )
}

fn set_blocking(file: &File) -> Result<(), TransportError> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is owned by `file` and open for the duration of the calls.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 {
            return Err(TransportError::last_os("fcntl(F_GETFL)"));
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) == -1 {
            return Err(TransportError::last_os("fcntl(F_SETFL)"));
        }
    }
    Ok(())
}

/// Create both pipes, replacing stale ones
pub(crate) fn provision(names: &ResourceNames) -> Result<(), TransportError> {
    let ResourceNames::Fifo {
        client_to_host,
        host_to_client,
    } = names
    else {
        return Err(TransportError::InvalidName(names.to_string()));
    };

    names.remove();
    for path in [client_to_host, host_to_client] {
        nix::unistd::mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR)
            .map_err(|e| TransportError::os("mkfifo", io::Error::from(e)))?;
    }
    tracing::debug!(names = %names, "Created named pipes");
    Ok(())
}

impl FifoTransport {
    /// Open an endpoint
    ///
    /// The creator reads `c2h` and writes `h2c`; the joiner does the
    /// opposite. Blocks (retrying) until the peer has opened its read end.
    ///
    /// # Errors
    ///
    /// Fails if the pipes never appear, the peer never connects within
    /// `open_attempts`, or the token is cancelled.
    pub(crate) fn open(
        id: ClientId,
        names: &ResourceNames,
        owner: Option<Ownership>,
        config: &TransportConfig,
        token: ShutdownToken,
    ) -> Result<Self, TransportError> {
        let ResourceNames::Fifo {
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
        let (read_path, write_path) = match role {
            Role::Creator => (client_to_host, host_to_client),
            Role::Joiner => (host_to_client, client_to_host),
        };

        let reader = open_end(read_path, false, config, &token)?;
        let writer = open_end(write_path, true, config, &token)?;
        set_blocking(&writer)?;

        tracing::debug!(client_id = %id, role = %role, "Named pipes connected");

        Ok(Self {
            id,
            role,
            reader,
            writer,
            config: config.clone(),
            token,
            _owner: owner,
        })
    }

    /// Wait one cycle for `events` on `file`
    ///
    /// Returns the reported events, or `None` on timeout.
    fn poll_once(
        &self,
        file: &File,
        events: libc::c_short,
    ) -> Result<Option<libc::c_short>, TransportError> {
        let mut pfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events,
            revents: 0,
        };
        let timeout = i32::try_from(self.config.poll_interval().as_millis()).unwrap_or(i32::MAX);

        // SAFETY: `pfd` is a valid pollfd array of length one.
        let rv = unsafe { libc::poll(&mut pfd, 1, timeout) };
        if rv < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(TransportError::os("poll", err));
        }
        if rv == 0 {
            return Ok(None);
        }
        Ok(Some(pfd.revents))
    }

    /// Wait one cycle for the read end to become readable
    ///
    /// Returns `false` on timeout.
    fn poll_readable(&self) -> Result<bool, TransportError> {
        match self.poll_once(&self.reader, libc::POLLIN)? {
            None => Ok(false),
            Some(revents) if revents & (libc::POLLERR | libc::POLLNVAL) != 0 => {
                Err(TransportError::Closed)
            }
            // POLLIN or POLLHUP: a read will return data or EOF
            Some(_) => Ok(true),
        }
    }

    /// Wait one cycle for room in the pipe
    ///
    /// Returns `false` on timeout. `POLLERR` means the reader is gone.
    fn poll_writable(&self) -> Result<bool, TransportError> {
        match self.poll_once(&self.writer, libc::POLLOUT)? {
            None => Ok(false),
            Some(revents)
                if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 =>
            {
                Err(TransportError::Closed)
            }
            Some(revents) => Ok(revents & libc::POLLOUT != 0),
        }
    }
}

impl Transport for FifoTransport {
    fn id(&self) -> ClientId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn kind_name(&self) -> &'static str {
        "fifo"
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let deadline = CallDeadline::starting_now(self.config.read_timeout());
        let mut filled = 0;

        while filled < buf.len() {
            if !self.poll_readable()? {
                deadline.after_tick(&self.token)?;
                continue;
            }

            match (&self.reader).read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(TransportError::os("read", e)),
            }
        }

        Ok(())
    }

    fn write(&self, buf: &[u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let deadline = CallDeadline::starting_now(self.config.write_timeout());

        // One record fits in PIPE_BUF, so once POLLOUT is reported the
        // blocking write completes at once and is never split
        while !self.poll_writable()? {
            deadline.after_tick(&self.token)?;
        }

        (&self.writer).write_all(buf).map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::os("write", e),
        })
    }
}
