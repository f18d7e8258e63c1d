//! Client Process Control
//!
//! Forking, signalling and reaping of client processes. This is the only
//! module that escalates to `SIGKILL`.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::shutdown::ShutdownToken;

const REAP_POLL: Duration = Duration::from_millis(20);

/// Whether `pid` has exited; reaps it if so
///
/// A pid that is not our child (`ECHILD`) counts as exited.
#[must_use]
pub fn try_reap(pid: Pid) -> bool {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(status) => {
            tracing::debug!(pid = pid.as_raw(), status = ?status, "Reaped client process");
            true
        }
        Err(Errno::EINTR) => false,
        Err(Errno::ECHILD) => true,
        Err(e) => {
            tracing::warn!(pid = pid.as_raw(), error = %e, "waitpid failed");
            true
        }
    }
}

/// Wait up to `grace` for `pid` to exit
fn wait_exit(pid: Pid, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    let pause = ShutdownToken::new();
    loop {
        if try_reap(pid) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        pause.sleep(REAP_POLL.min(deadline - now));
    }
}

/// Stop a client: `SIGTERM`, wait up to `grace`, then `SIGKILL` and reap
///
/// Safe to call for a process that already exited.
pub fn terminate(pid: Pid, grace: Duration) {
    match signal::kill(pid, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            let _ = try_reap(pid);
            return;
        }
        Err(e) => tracing::warn!(pid = pid.as_raw(), error = %e, "SIGTERM failed"),
    }

    if wait_exit(pid, grace) {
        return;
    }

    tracing::warn!(pid = pid.as_raw(), "Client ignored SIGTERM, sending SIGKILL");
    if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
        if e != Errno::ESRCH {
            tracing::warn!(pid = pid.as_raw(), error = %e, "SIGKILL failed");
        }
    }

    if let Err(e) = waitpid(pid, None) {
        if e != Errno::ECHILD {
            tracing::warn!(pid = pid.as_raw(), error = %e, "Failed to reap killed client");
        }
    }
}

/// Terminate several clients, sharing one grace period
pub fn terminate_all(pids: &[Pid], grace: Duration) {
    for &pid in pids {
        if let Err(e) = signal::kill(pid, Signal::SIGTERM) {
            if e != Errno::ESRCH {
                tracing::warn!(pid = pid.as_raw(), error = %e, "SIGTERM failed");
            }
        }
    }

    let deadline = Instant::now() + grace;
    for &pid in pids {
        let left = deadline.saturating_duration_since(Instant::now());
        if !wait_exit(pid, left) {
            terminate(pid, Duration::ZERO);
        }
    }
}

/// Run `child` in a forked process
///
/// The child starts with `SIGINT`/`SIGTERM` unblocked, runs `child`, and
/// leaves with `_exit` so nothing inherited from the parent is dropped
/// twice. A panic in `child` exits with status 101.
///
/// Must be called while the calling process has a single thread.
///
/// # Errors
///
/// Returns the `fork` error.
pub fn spawn_child<F>(child: F) -> Result<Pid, Errno>
where
    F: FnOnce() -> i32,
{
    // SAFETY: the host forks before starting any threads, and the child
    // never returns into the parent's code: it leaves through `_exit`.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let mut unblock = SigSet::empty();
            unblock.add(Signal::SIGINT);
            unblock.add(Signal::SIGTERM);
            let _ = unblock.thread_unblock();

            let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(child)).unwrap_or(101);
            // SAFETY: `_exit` skips destructors of values owned by the
            // parent's stack frames, which the child must not run.
            unsafe { libc::_exit(code) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn alive(pid: Pid) -> bool {
        signal::kill(pid, None).is_ok()
    }

    #[test]
    fn test_terminate_stops_sleeping_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        assert!(alive(pid));

        terminate(pid, Duration::from_millis(500));
        assert!(!alive(pid));
    }

    #[test]
    fn test_terminate_escalates_when_sigterm_is_ignored() {
        let child = Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        // Let the shell install its trap
        ShutdownToken::new().sleep(Duration::from_millis(200));

        let start = Instant::now();
        terminate(pid, Duration::from_millis(100));
        assert!(!alive(pid));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_try_reap_not_our_child() {
        assert!(try_reap(Pid::from_raw(1)));
    }
}
