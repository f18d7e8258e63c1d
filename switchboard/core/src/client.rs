//! Client Process Loop
//!
//! What a forked client runs: attach to its connection, announce `ready`
//! and `listening`, then log every record it receives until the connection
//! fails or shutdown is requested.

use crate::messages::{ClientId, Message, SystemSignal, TARGET_BROADCAST};
use crate::shutdown::ShutdownToken;
use crate::transport::{open_joiner, Transport, TransportConfig, TransportError};

/// How a received record is presented
#[must_use]
pub fn describe(msg: &Message) -> String {
    let prefix = if msg.is_from_host() {
        if msg.target_id == TARGET_BROADCAST {
            "broadcast".to_string()
        } else {
            format!("host private to {}", msg.target_id)
        }
    } else {
        format!("from {}", msg.sender_id)
    };
    format!("{prefix}: {}", msg.text())
}

/// Announce readiness, then receive until the endpoint fails
///
/// Returns the error that ended the loop.
pub fn serve(id: ClientId, transport: &dyn Transport) -> TransportError {
    for signal in [SystemSignal::Ready, SystemSignal::Listening] {
        if let Err(e) = transport.send(&Message::system(id, signal)) {
            tracing::warn!(
                client_id = %id,
                error = %e,
                "Client {id} failed to send {} signal",
                signal.keyword()
            );
        }
    }

    tracing::info!(client_id = %id, "Client {id} waiting for messages");

    loop {
        match transport.recv() {
            Ok(msg) => tracing::info!(client_id = %id, "Client {id} received {}", describe(&msg)),
            Err(e) => return e,
        }
    }
}

/// Full client lifetime; returns the process exit code
pub fn run_client(id: ClientId, config: &TransportConfig, token: ShutdownToken) -> i32 {
    let transport = match open_joiner(id, config, token) {
        Ok(transport) => transport,
        Err(e) => {
            tracing::error!(client_id = %id, error = %e, "Client {id} failed to connect");
            return 1;
        }
    };

    let reason = serve(id, transport.as_ref());
    tracing::debug!(client_id = %id, reason = %reason, "Client loop ended");
    tracing::info!(client_id = %id, "Client {id} exiting");
    0
}
