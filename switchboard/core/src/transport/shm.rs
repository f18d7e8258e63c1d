//! Shared Memory Transport
//!
//! One POSIX shared memory object per connection holding two mailboxes,
//! one per direction. Each mailbox is a single record slot guarded by a
//! pair of process-shared semaphores:
//!
//! ```text
//! Segment
//! +-- to_host:   has_data (0) | has_space (1) | slot[MESSAGE_SIZE]
//! +-- to_client: has_data (0) | has_space (1) | slot[MESSAGE_SIZE]
//! ```
//!
//! A writer waits on `has_space`, copies into the slot and posts
//! `has_data`; a reader does the reverse. The semaphores live inside the
//! segment, so creator and joiner only need to agree on its name.

use std::ffi::CString;
use std::io;
use std::mem;
use std::ptr::{self, NonNull};

use crate::messages::{ClientId, MESSAGE_SIZE};
use crate::shutdown::ShutdownToken;

use super::config::TransportConfig;
use super::resources::{Ownership, ResourceNames};
use super::traits::{check_len, Role, Transport, TransportError};
use super::wait::{is_missing, open_with_retry, realtime_deadline, CallDeadline};

#[repr(C)]
struct Mailbox {
    has_data: libc::sem_t,
    has_space: libc::sem_t,
    slot: [u8; MESSAGE_SIZE],
}

#[repr(C)]
struct Segment {
    to_host: Mailbox,
    to_client: Mailbox,
}

const SEGMENT_SIZE: usize = mem::size_of::<Segment>();

fn segment_name(names: &ResourceNames) -> Result<&CString, TransportError> {
    match names {
        ResourceNames::Shm { segment } => Ok(segment),
        other => Err(TransportError::InvalidName(other.to_string())),
    }
}

/// Closes the descriptor when dropped
struct Fd(libc::c_int);

impl Drop for Fd {
    fn drop(&mut self) {
        // SAFETY: the descriptor is owned and closed exactly once.
        unsafe {
            libc::close(self.0);
        }
    }
}

fn map(fd: &Fd) -> Result<NonNull<Segment>, TransportError> {
    // SAFETY: mapping a descriptor we own with a length it was truncated to.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            SEGMENT_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd.0,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(TransportError::last_os("mmap"));
    }
    NonNull::new(addr.cast::<Segment>()).ok_or(TransportError::Os {
        op: "mmap",
        source: io::Error::from_raw_os_error(libc::EFAULT),
    })
}

fn unmap(segment: NonNull<Segment>) {
    // SAFETY: `segment` came from `map` and is unmapped exactly once.
    unsafe {
        libc::munmap(segment.as_ptr().cast::<libc::c_void>(), SEGMENT_SIZE);
    }
}

/// Create the segment and initialize both mailboxes
pub(crate) fn provision(names: &ResourceNames) -> Result<(), TransportError> {
    let name = segment_name(names)?;
    names.remove();

    // SAFETY: `name` is a valid NUL-terminated string.
    let raw = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600 as libc::mode_t,
        )
    };
    if raw == -1 {
        return Err(TransportError::last_os("shm_open(O_CREAT)"));
    }
    let fd = Fd(raw);

    let len = libc::off_t::try_from(SEGMENT_SIZE).unwrap_or(libc::off_t::MAX);
    // SAFETY: `fd` is an open shared memory descriptor.
    if unsafe { libc::ftruncate(fd.0, len) } == -1 {
        return Err(TransportError::last_os("ftruncate"));
    }

    let segment = map(&fd)?;
    // SAFETY: the mapping is SEGMENT_SIZE bytes and nobody else can have
    // it open before provisioning returns.
    let init = unsafe {
        let seg = segment.as_ptr();
        let mut rv = 0;
        for mailbox in [ptr::addr_of_mut!((*seg).to_host), ptr::addr_of_mut!((*seg).to_client)] {
            rv |= libc::sem_init(ptr::addr_of_mut!((*mailbox).has_data), 1, 0);
            rv |= libc::sem_init(ptr::addr_of_mut!((*mailbox).has_space), 1, 1);
        }
        rv
    };
    let result = if init == 0 {
        Ok(())
    } else {
        Err(TransportError::last_os("sem_init"))
    };
    unmap(segment);
    result?;

    tracing::debug!(names = %names, size = SEGMENT_SIZE, "Created shared memory segment");
    Ok(())
}

/// Open an existing segment, treating a not-yet-sized one as missing
fn open_segment(name: &CString) -> io::Result<Fd> {
    // SAFETY: `name` is a valid NUL-terminated string.
    let raw = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0) };
    if raw == -1 {
        return Err(io::Error::last_os_error());
    }
    let fd = Fd(raw);

    // SAFETY: `stat` is plain data and `fd` is open.
    let size = unsafe {
        let mut stat: libc::stat = mem::zeroed();
        if libc::fstat(fd.0, &mut stat) == -1 {
            return Err(io::Error::last_os_error());
        }
        stat.st_size
    };
    if usize::try_from(size).unwrap_or(0) < SEGMENT_SIZE {
        return Err(io::Error::from_raw_os_error(libc::ENOENT));
    }
    Ok(fd)
}

/// Shared memory endpoint
pub struct ShmTransport {
    id: ClientId,
    role: Role,
    segment: NonNull<Segment>,
    config: TransportConfig,
    token: ShutdownToken,
    /// Held by the creator only; must stay the last field
    _owner: Option<Ownership>,
}

// SAFETY: the mapping stays valid for the life of the value, and every
// access to a slot is serialized by that mailbox's semaphores.
unsafe impl Send for ShmTransport {}
// SAFETY: see above; `read` and `write` touch different mailboxes.
unsafe impl Sync for ShmTransport {}

impl ShmTransport {
    /// Map a provisioned segment
    ///
    /// # Errors
    ///
    /// Fails if the segment never appears or cannot be mapped.
    pub(crate) fn open(
        id: ClientId,
        names: &ResourceNames,
        owner: Option<Ownership>,
        config: &TransportConfig,
        token: ShutdownToken,
    ) -> Result<Self, TransportError> {
        let name = segment_name(names)?;
        let role = if owner.is_some() {
            Role::Creator
        } else {
            Role::Joiner
        };

        let fd = open_with_retry(
            &name.to_string_lossy(),
            config,
            &token,
            || open_segment(name),
            is_missing,
        )?;
        let segment = map(&fd)?;
        drop(fd);

        tracing::debug!(client_id = %id, role = %role, "Shared memory mapped");

        Ok(Self {
            id,
            role,
            segment,
            config: config.clone(),
            token,
            _owner: owner,
        })
    }

    fn mailbox(&self, inbound: bool) -> *mut Mailbox {
        let to_host = match self.role {
            Role::Creator => inbound,
            Role::Joiner => !inbound,
        };
        let seg = self.segment.as_ptr();
        // SAFETY: `seg` points at a live mapping of a full Segment.
        unsafe {
            if to_host {
                ptr::addr_of_mut!((*seg).to_host)
            } else {
                ptr::addr_of_mut!((*seg).to_client)
            }
        }
    }

    /// Wait on `sem` one cycle at a time until it is acquired
    fn acquire(
        &self,
        sem: *mut libc::sem_t,
        deadline: CallDeadline,
    ) -> Result<(), TransportError> {
        loop {
            let ts = realtime_deadline(self.config.poll_interval());
            // SAFETY: `sem` is an initialized process-shared semaphore inside
            // the mapping; `ts` outlives the call.
            if unsafe { libc::sem_timedwait(sem, &ts) } == 0 {
                return Ok(());
            }

            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ETIMEDOUT) => deadline.after_tick(&self.token)?,
                Some(libc::EINTR) => {}
                _ => return Err(TransportError::os("sem_timedwait", err)),
            }
        }
    }

    fn post(sem: *mut libc::sem_t) -> Result<(), TransportError> {
        // SAFETY: `sem` is an initialized semaphore inside the mapping.
        if unsafe { libc::sem_post(sem) } == 0 {
            Ok(())
        } else {
            Err(TransportError::last_os("sem_post"))
        }
    }
}

impl Transport for ShmTransport {
    fn id(&self) -> ClientId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn kind_name(&self) -> &'static str {
        "shm"
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let mailbox = self.mailbox(true);
        let deadline = CallDeadline::starting_now(self.config.read_timeout());

        // SAFETY: field projections on a live mapping.
        let (has_data, has_space, slot) = unsafe {
            (
                ptr::addr_of_mut!((*mailbox).has_data),
                ptr::addr_of_mut!((*mailbox).has_space),
                ptr::addr_of!((*mailbox).slot).cast::<u8>(),
            )
        };

        self.acquire(has_data, deadline)?;
        // SAFETY: holding `has_data` gives exclusive access to the slot until
        // `has_space` is posted; `buf` is MESSAGE_SIZE bytes.
        unsafe {
            ptr::copy_nonoverlapping(slot, buf.as_mut_ptr(), MESSAGE_SIZE);
        }
        Self::post(has_space)
    }

    fn write(&self, buf: &[u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let mailbox = self.mailbox(false);
        let deadline = CallDeadline::starting_now(self.config.write_timeout());

        // SAFETY: field projections on a live mapping.
        let (has_data, has_space, slot) = unsafe {
            (
                ptr::addr_of_mut!((*mailbox).has_data),
                ptr::addr_of_mut!((*mailbox).has_space),
                ptr::addr_of_mut!((*mailbox).slot).cast::<u8>(),
            )
        };

        self.acquire(has_space, deadline)?;
        // SAFETY: holding `has_space` gives exclusive access to the slot until
        // `has_data` is posted; `buf` is MESSAGE_SIZE bytes.
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), slot, MESSAGE_SIZE);
        }
        Self::post(has_data)
    }
}

impl Drop for ShmTransport {
    fn drop(&mut self) {
        if self.role == Role::Creator {
            let seg = self.segment.as_ptr();
            // SAFETY: the creator tears down last; no peer waits on these
            // semaphores once the host has released the connection.
            unsafe {
                for mailbox in [ptr::addr_of_mut!((*seg).to_host), ptr::addr_of_mut!((*seg).to_client)] {
                    libc::sem_destroy(ptr::addr_of_mut!((*mailbox).has_data));
                    libc::sem_destroy(ptr::addr_of_mut!((*mailbox).has_space));
                }
            }
        }
        unmap(self.segment);
    }
}
