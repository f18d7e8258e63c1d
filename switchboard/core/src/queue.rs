//! Inbound Queue
//!
//! The buffer between the per-client receivers (producers) and the router
//! (sole consumer). Order is preserved per producer; there is no ordering
//! across producers.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::messages::Message;

/// Shared multi-producer, single-consumer message buffer
#[derive(Debug, Default)]
pub struct InboundQueue {
    messages: Mutex<VecDeque<Message>>,
}

impl InboundQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message
    pub fn push(&self, msg: Message) {
        self.messages.lock().push_back(msg);
    }

    /// Take everything queued so far, oldest first
    #[must_use]
    pub fn drain_all(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock()).into()
    }

    /// Number of queued messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_drain_preserves_order_and_empties() {
        let queue = InboundQueue::new();
        queue.push(Message::broadcast(0, "a"));
        queue.push(Message::broadcast(0, "b"));
        assert_eq!(queue.len(), 2);

        let texts: Vec<_> = queue.drain_all().iter().map(|m| m.text().into_owned()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }
}
