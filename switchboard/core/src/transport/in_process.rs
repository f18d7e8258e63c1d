//! In-Process Transport
//!
//! A connected endpoint pair that never leaves the process. It keeps the
//! same one-record-per-direction capacity as the OS transports, so the
//! router, receivers and registry can be driven in tests without touching
//! named resources.
//!
//! # Usage
//!
//! ```ignore
//! let (host_end, client_end) = InProcessTransport::pair(ClientId::new(0), token);
//!
//! // Register host_end with the host, hand client_end to the client loop
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::messages::{ClientId, MESSAGE_SIZE};
use crate::shutdown::ShutdownToken;

use super::traits::{check_len, Role, Transport, TransportError};
use super::wait::CallDeadline;

const TICK: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Mailbox {
    slot: Mutex<Option<[u8; MESSAGE_SIZE]>>,
    changed: Condvar,
}

#[derive(Default)]
struct Shared {
    to_host: Mailbox,
    to_client: Mailbox,
    closed: AtomicBool,
}

/// One end of an in-process connection
pub struct InProcessTransport {
    id: ClientId,
    role: Role,
    shared: Arc<Shared>,
    token: ShutdownToken,
    write_timeout: Option<Duration>,
}

impl InProcessTransport {
    /// Create a connected pair: `(creator, joiner)`
    #[must_use]
    pub fn pair(id: ClientId, token: ShutdownToken) -> (Self, Self) {
        let shared = Arc::new(Shared::default());
        let creator = Self {
            id,
            role: Role::Creator,
            shared: Arc::clone(&shared),
            token: token.clone(),
            write_timeout: None,
        };
        let joiner = Self {
            id,
            role: Role::Joiner,
            shared,
            token,
            write_timeout: None,
        };
        (creator, joiner)
    }

    /// Give up on writes that cannot be placed within `timeout`
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    fn inbound(&self) -> &Mailbox {
        match self.role {
            Role::Creator => &self.shared.to_host,
            Role::Joiner => &self.shared.to_client,
        }
    }

    fn outbound(&self) -> &Mailbox {
        match self.role {
            Role::Creator => &self.shared.to_client,
            Role::Joiner => &self.shared.to_host,
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Transport for InProcessTransport {
    fn id(&self) -> ClientId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn kind_name(&self) -> &'static str {
        "in-process"
    }

    fn read(&self, buf: &mut [u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let deadline = CallDeadline::starting_now(None);
        let mailbox = self.inbound();
        let mut slot = mailbox.slot.lock();

        loop {
            if let Some(record) = slot.take() {
                buf.copy_from_slice(&record);
                mailbox.changed.notify_all();
                return Ok(());
            }
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            if mailbox.changed.wait_for(&mut slot, TICK).timed_out() {
                deadline.after_tick(&self.token)?;
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<(), TransportError> {
        check_len(buf.len())?;
        let deadline = CallDeadline::starting_now(self.write_timeout);
        let mailbox = self.outbound();
        let mut slot = mailbox.slot.lock();

        loop {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            if slot.is_none() {
                let mut record = [0u8; MESSAGE_SIZE];
                record.copy_from_slice(buf);
                *slot = Some(record);
                mailbox.changed.notify_all();
                return Ok(());
            }
            if mailbox.changed.wait_for(&mut slot, TICK).timed_out() {
                deadline.after_tick(&self.token)?;
            }
        }
    }
}

impl Drop for InProcessTransport {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        for mailbox in [&self.shared.to_host, &self.shared.to_client] {
            let _guard = mailbox.slot.lock();
            mailbox.changed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_pair_round_trip() {
        let (host, client) = InProcessTransport::pair(ClientId::new(2), ShutdownToken::new());
        client.send(&Message::broadcast(2, "hi")).unwrap();
        let got = host.recv().unwrap();
        assert_eq!(got.text(), "hi");
        assert_eq!(got.sender_id, 2);

        host.send(&Message::direct(-1, ClientId::new(2), "back")).unwrap();
        assert_eq!(client.recv().unwrap().text(), "back");
    }

    #[test]
    fn test_second_write_blocks_until_read() {
        let (host, client) = InProcessTransport::pair(ClientId::new(0), ShutdownToken::new());
        let host = host.with_write_timeout(Duration::from_millis(50));
        host.send(&Message::broadcast(-1, "one")).unwrap();
        let err = host.send(&Message::broadcast(-1, "two")).unwrap_err();
        assert!(matches!(err, TransportError::TimedOut(50)));

        assert_eq!(client.recv().unwrap().text(), "one");
        host.send(&Message::broadcast(-1, "two")).unwrap();
        assert_eq!(client.recv().unwrap().text(), "two");
    }

    #[test]
    fn test_drop_closes_peer() {
        let (host, client) = InProcessTransport::pair(ClientId::new(0), ShutdownToken::new());
        let reader = thread::spawn(move || host.recv());
        drop(client);
        assert!(matches!(reader.join().unwrap(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_cancel_unblocks_read() {
        let token = ShutdownToken::new();
        let (host, _client) = InProcessTransport::pair(ClientId::new(0), token.clone());
        let reader = thread::spawn(move || host.recv());
        token.cancel();
        assert!(matches!(reader.join().unwrap(), Err(TransportError::Cancelled)));
    }

    #[test]
    fn test_wrong_size_rejected() {
        let (host, _client) = InProcessTransport::pair(ClientId::new(0), ShutdownToken::new());
        assert!(matches!(
            host.write(&[0u8; 10]),
            Err(TransportError::InvalidLength { actual: 10, .. })
        ));
    }
}
