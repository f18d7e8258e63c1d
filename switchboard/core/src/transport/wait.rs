//! Wait Helpers
//!
//! Shared building blocks for the bounded, cancellable wait loops used by
//! every transport: absolute `CLOCK_REALTIME` deadlines for the timed POSIX
//! calls, the per-call deadline check, and open-with-retry.

use std::io;
use std::time::{Duration, Instant};

use crate::shutdown::ShutdownToken;

use super::config::TransportConfig;
use super::traits::TransportError;

/// Absolute realtime deadline `after` from now, for `*_timedwait` style calls
pub(crate) fn realtime_deadline(after: Duration) -> libc::timespec {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_REALTIME, &mut now);
    }

    let nanos = now.tv_nsec as u64 + u64::from(after.subsec_nanos());
    let carry = nanos / 1_000_000_000;
    now.tv_nsec = (nanos % 1_000_000_000) as libc::c_long;
    now.tv_sec += (after.as_secs() + carry) as libc::time_t;
    now
}

/// Deadline for one logical read or write
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallDeadline {
    limit: Option<(Instant, Duration)>,
}

impl CallDeadline {
    pub(crate) fn starting_now(timeout: Option<Duration>) -> Self {
        Self {
            limit: timeout.map(|t| (Instant::now() + t, t)),
        }
    }

    /// Called after a wait cycle timed out: decide whether to keep going
    pub(crate) fn after_tick(&self, token: &ShutdownToken) -> Result<(), TransportError> {
        if token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match self.limit {
            Some((at, timeout)) if Instant::now() >= at => Err(TransportError::TimedOut(
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
            _ => Ok(()),
        }
    }
}

/// Retry `attempt` while `retryable` says the resource is not there yet
///
/// Waits `open_retry` between tries, up to `open_attempts` tries, and stops
/// early when the token is cancelled.
pub(crate) fn open_with_retry<T>(
    name: &str,
    config: &TransportConfig,
    token: &ShutdownToken,
    mut attempt: impl FnMut() -> io::Result<T>,
    retryable: impl Fn(&io::Error) -> bool,
) -> Result<T, TransportError> {
    let attempts = config.open_attempts.max(1);
    for n in 1..=attempts {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if retryable(&e) => {
                tracing::trace!(name = %name, attempt = n, error = %e, "Resource not ready");
                if n < attempts && token.sleep(config.open_retry()) {
                    return Err(TransportError::Cancelled);
                }
            }
            Err(e) => return Err(TransportError::os("open", e)),
        }
    }

    Err(TransportError::Unavailable {
        name: name.to_string(),
        attempts,
    })
}

/// `ENOENT`: the creator has not made the name yet
pub(crate) fn is_missing(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::ENOENT)
}
