//! Router - Message Fan-Out
//!
//! Drains the inbound queue on a fixed tick and writes each message to its
//! destination: every registered client for broadcasts, one client for
//! direct messages. A failed write to one client is logged and does not
//! stop delivery to the others.

use std::time::Duration;

use crate::context::HostContext;
use crate::messages::{ClientId, Message, Target};

/// Outcome of routing one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Clients the message was written to
    pub delivered: Vec<ClientId>,
    /// Clients whose write failed
    pub failed: Vec<ClientId>,
    /// The target was not deliverable at all
    pub dropped: bool,
}

impl RouteReport {
    fn dropped() -> Self {
        Self {
            dropped: true,
            ..Self::default()
        }
    }
}

/// Routes messages using the shared registry
#[derive(Debug, Clone)]
pub struct Router {
    ctx: HostContext,
}

impl Router {
    /// Create a router over `ctx`
    #[must_use]
    pub fn new(ctx: HostContext) -> Self {
        Self { ctx }
    }

    /// Deliver one message
    pub fn route(&self, msg: &Message) -> RouteReport {
        let text = msg.text();
        let from = if msg.is_from_host() {
            "host".to_string()
        } else {
            msg.sender_id.to_string()
        };
        match msg.target() {
            Target::Broadcast => {
                tracing::info!(sender = msg.sender_id, "Broadcast from {from}: {text}");
                let mut report = RouteReport::default();
                for connection in self.ctx.registry.connections() {
                    let id = connection.id();
                    match connection.send(msg) {
                        Ok(()) => report.delivered.push(id),
                        Err(e) => {
                            tracing::warn!(client_id = %id, error = %e, "Failed to send broadcast to client {id}");
                            report.failed.push(id);
                        }
                    }
                }
                report
            }
            Target::Client(id) => {
                tracing::info!(sender = msg.sender_id, "Private from {from} to {id}: {text}");
                let Some(connection) = self.ctx.registry.connection(id) else {
                    tracing::warn!(client_id = %id, "No such client, message dropped");
                    return RouteReport::dropped();
                };
                match connection.send(msg) {
                    Ok(()) => RouteReport {
                        delivered: vec![id],
                        ..RouteReport::default()
                    },
                    Err(e) => {
                        tracing::warn!(client_id = %id, error = %e, "Failed to send private to {id}");
                        RouteReport {
                            failed: vec![id],
                            ..RouteReport::default()
                        }
                    }
                }
            }
            Target::System | Target::Invalid(_) => {
                tracing::warn!(
                    sender = msg.sender_id,
                    target = msg.target_id,
                    "Undeliverable target, message dropped"
                );
                RouteReport::dropped()
            }
        }
    }

    /// Route everything currently queued
    ///
    /// Returns the number of messages taken from the queue.
    pub fn dispatch_batch(&self) -> usize {
        let batch = self.ctx.inbound.drain_all();
        for msg in &batch {
            self.route(msg);
        }
        batch.len()
    }

    /// Dispatch once per `tick` until shutdown
    pub fn run(&self, tick: Duration) {
        tracing::debug!(tick_ms = tick.as_millis(), "Router started");
        while !self.ctx.token.sleep(tick) {
            self.dispatch_batch();
        }
        tracing::debug!("Router stopped");
    }
}
