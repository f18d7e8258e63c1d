//! Host Context
//!
//! The state every host-side thread shares, bundled into one cloneable
//! handle instead of process-wide globals.

use std::sync::Arc;

use crate::queue::InboundQueue;
use crate::registry::ClientRegistry;
use crate::shutdown::ShutdownToken;

/// Shared host state handed to receivers, router and monitor
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    /// Connected clients
    pub registry: Arc<ClientRegistry>,
    /// Messages waiting for the router
    pub inbound: Arc<InboundQueue>,
    /// Cancelled when the host shuts down
    pub token: ShutdownToken,
}

impl HostContext {
    /// Fresh context with an empty registry and queue
    #[must_use]
    pub fn new(token: ShutdownToken) -> Self {
        Self {
            registry: Arc::new(ClientRegistry::new()),
            inbound: Arc::new(InboundQueue::new()),
            token,
        }
    }
}
