//! Inactivity Monitor
//!
//! Runs on a slow tick. Each tick it reaps client processes that exited on
//! their own and evicts clients that have been silent for longer than the
//! inactivity threshold, terminating their processes.

use std::time::{Duration, Instant};

use crate::context::HostContext;
use crate::messages::ClientId;
use crate::process;

/// What one monitor tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    /// Clients whose process had already exited
    pub reaped: Vec<ClientId>,
    /// Clients evicted for inactivity
    pub evicted: Vec<ClientId>,
}

/// Periodic liveness check over the registry
#[derive(Debug, Clone)]
pub struct InactivityMonitor {
    ctx: HostContext,
    threshold: Duration,
    grace: Duration,
}

impl InactivityMonitor {
    /// Evict clients idle longer than `threshold`, giving each `grace` to exit
    #[must_use]
    pub fn new(ctx: HostContext, threshold: Duration, grace: Duration) -> Self {
        Self {
            ctx,
            threshold,
            grace,
        }
    }

    /// Run one check as of `now`
    pub fn tick_at(&self, now: Instant) -> MonitorReport {
        let registry = &self.ctx.registry;
        let mut report = MonitorReport::default();

        for (id, pid) in registry.pids() {
            if process::try_reap(pid) {
                tracing::info!(client_id = %id, pid = pid.as_raw(), "Client {id} process exited");
                registry.remove(id);
                report.reaped.push(id);
            }
        }

        for (id, pid) in registry.stale(now, self.threshold) {
            tracing::info!(client_id = %id, "Killing inactive client {id}");
            registry.remove(id);
            if let Some(pid) = pid {
                process::terminate(pid, self.grace);
            }
            report.evicted.push(id);
        }

        report
    }

    /// Check once per `tick` until shutdown
    pub fn run(&self, tick: Duration) {
        tracing::debug!(
            tick_ms = tick.as_millis(),
            threshold_secs = self.threshold.as_secs(),
            "Inactivity monitor started"
        );
        while !self.ctx.token.sleep(tick) {
            self.tick_at(Instant::now());
        }
        tracing::debug!("Inactivity monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Connection;
    use crate::shutdown::ShutdownToken;
    use crate::transport::InProcessTransport;
    use nix::sys::signal;
    use nix::unistd::Pid;
    use pretty_assertions::assert_eq;
    use std::process::Command;
    use std::sync::Arc;

    fn register(ctx: &HostContext, id: u32, pid: Option<Pid>) -> InProcessTransport {
        let (host, client) = InProcessTransport::pair(ClientId::new(id), ctx.token.clone());
        ctx.registry
            .register(Arc::new(Connection::new(Box::new(host))), pid);
        client
    }

    #[test]
    fn test_stale_client_is_evicted_and_killed() {
        let ctx = HostContext::new(ShutdownToken::new());
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        let _c0 = register(&ctx, 0, Some(pid));
        let _c1 = register(&ctx, 1, None);

        let later = Instant::now() + Duration::from_secs(61);
        ctx.registry.touch_at(ClientId::new(1), later);

        let monitor =
            InactivityMonitor::new(ctx.clone(), Duration::from_secs(60), Duration::from_millis(500));
        let report = monitor.tick_at(later);

        assert_eq!(report.evicted, vec![ClientId::new(0)]);
        assert!(!ctx.registry.contains(ClientId::new(0)));
        assert!(ctx.registry.contains(ClientId::new(1)));
        assert!(signal::kill(pid, None).is_err());
    }

    #[test]
    fn test_fresh_clients_are_kept() {
        let ctx = HostContext::new(ShutdownToken::new());
        let _c0 = register(&ctx, 0, None);
        let monitor =
            InactivityMonitor::new(ctx.clone(), Duration::from_secs(60), Duration::from_millis(10));

        let report = monitor.tick_at(Instant::now());
        assert_eq!(report, MonitorReport::default());
        assert_eq!(ctx.registry.len(), 1);
    }

    #[test]
    fn test_exited_process_is_reaped() {
        let ctx = HostContext::new(ShutdownToken::new());
        let child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());
        let _c0 = register(&ctx, 0, Some(pid));

        let monitor =
            InactivityMonitor::new(ctx.clone(), Duration::from_secs(60), Duration::from_millis(10));
        let start = Instant::now();
        let mut reaped = Vec::new();
        while reaped.is_empty() && start.elapsed() < Duration::from_secs(5) {
            reaped = monitor.tick_at(Instant::now()).reaped;
            ctx.token.sleep(Duration::from_millis(10));
        }

        assert_eq!(reaped, vec![ClientId::new(0)]);
        assert!(ctx.registry.is_empty());
    }
}
