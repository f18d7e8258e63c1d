//! Receiver - One Per Client, Host Side
//!
//! Reads from a client's endpoint until it fails. Every record stamps the
//! client's activity; system records drive the handshake flags and user
//! records go to the inbound queue for the router.

use std::sync::Arc;

use crate::context::HostContext;
use crate::messages::{SystemSignal, Target};
use crate::registry::Connection;
use crate::transport::TransportError;

/// Receive loop for one client
///
/// Returns when the endpoint fails or shutdown is requested.
pub fn run_receiver(ctx: &HostContext, connection: &Arc<Connection>) {
    let id = connection.id();
    tracing::info!(client_id = %id, "Client {id} joined");

    let err = loop {
        let msg = match connection.recv() {
            Ok(msg) => msg,
            Err(e) => break e,
        };
        ctx.registry.touch(id);

        if msg.target() != Target::System {
            ctx.inbound.push(msg);
            continue;
        }

        let text = msg.text();
        match SystemSignal::parse(&text) {
            Some(signal) => {
                if ctx.registry.mark_signal(id, signal) {
                    match signal {
                        SystemSignal::Ready => tracing::info!(client_id = %id, "Client {id} ready"),
                        SystemSignal::Listening => {
                            tracing::info!(client_id = %id, "Client {id} started listening");
                        }
                    }
                }
            }
            None => tracing::warn!(client_id = %id, keyword = %text, "Unknown system message"),
        }
    };

    match err {
        TransportError::Cancelled => tracing::debug!(client_id = %id, "Receiver stopped"),
        e => {
            tracing::info!(client_id = %id, error = %e, "Client {id} disconnected");
            ctx.registry.mark_disconnected(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientId, Message};
    use crate::shutdown::ShutdownToken;
    use crate::transport::{InProcessTransport, Transport};
    use pretty_assertions::assert_eq;
    use std::thread;
    use std::time::Duration;

    fn start(id: u32) -> (HostContext, InProcessTransport, thread::JoinHandle<()>) {
        let ctx = HostContext::new(ShutdownToken::new());
        let (host, client) = InProcessTransport::pair(ClientId::new(id), ctx.token.clone());
        let connection = Arc::new(Connection::new(Box::new(host)));
        ctx.registry.register(Arc::clone(&connection), None);

        let worker = ctx.clone();
        let handle = thread::spawn(move || run_receiver(&worker, &connection));
        (ctx, client, handle)
    }

    #[test]
    fn test_handshake_signals_set_flags() {
        let (ctx, client, handle) = start(0);
        let id = ClientId::new(0);

        client.send(&Message::system(id, SystemSignal::Ready)).unwrap();
        client.send(&Message::system(id, SystemSignal::Ready)).unwrap();
        client.send(&Message::system(id, SystemSignal::Listening)).unwrap();

        assert!(ctx.registry.wait_for_phase(SystemSignal::Listening, Duration::from_secs(5)));
        assert!(ctx.registry.has_signalled(id, SystemSignal::Ready));
        assert!(ctx.inbound.is_empty());

        ctx.token.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_user_messages_are_queued() {
        let (ctx, client, handle) = start(1);

        client.send(&Message::broadcast(1, "first")).unwrap();
        client.send(&Message::direct(1, ClientId::new(0), "second")).unwrap();
        // Third write only completes once the second has been taken
        client.send(&Message::broadcast(1, "third")).unwrap();

        let start = std::time::Instant::now();
        while ctx.inbound.len() < 3 && start.elapsed() < Duration::from_secs(5) {
            ctx.token.sleep(Duration::from_millis(5));
        }
        let texts: Vec<_> = ctx
            .inbound
            .drain_all()
            .iter()
            .map(|m| m.text().into_owned())
            .collect();
        assert_eq!(texts, vec!["first", "second", "third"]);

        ctx.token.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_unknown_keyword_is_ignored() {
        let (ctx, client, handle) = start(0);
        let mut msg = Message::system(ClientId::new(0), SystemSignal::Ready);
        msg.set_text("dancing");
        client.send(&msg).unwrap();
        client.send(&Message::broadcast(0, "after")).unwrap();

        let start = std::time::Instant::now();
        while ctx.inbound.is_empty() && start.elapsed() < Duration::from_secs(5) {
            ctx.token.sleep(Duration::from_millis(5));
        }
        assert!(!ctx.registry.has_signalled(ClientId::new(0), SystemSignal::Ready));
        assert_eq!(ctx.inbound.drain_all().len(), 1);

        ctx.token.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn test_peer_close_marks_disconnected() {
        let (ctx, client, handle) = start(0);
        drop(client);
        handle.join().unwrap();

        let entries = ctx.registry.clear();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].disconnected);
    }
}
