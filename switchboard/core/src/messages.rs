//! Message Record
//!
//! The fixed-size record exchanged over every transport.
//!
//! # Wire Format
//!
//! ```text
//! +----------------+-------------+-------------+---------------------------+
//! | timestamp (8)  | sender (4)  | target (4)  | text (256, NUL-terminated)|
//! | i64 native-end | i32         | i32         | UTF-8 bytes, zero padded  |
//! +----------------+-------------+-------------+---------------------------+
//! ```
//!
//! There is no length prefix or framing: every transport call moves exactly
//! [`MESSAGE_SIZE`] bytes. Both ends live on the same host, so fields are
//! encoded in native byte order.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity of the text field, including the terminating NUL
pub const TEXT_CAPACITY: usize = 256;

/// Exact size of an encoded [`Message`]
pub const MESSAGE_SIZE: usize = 8 + 4 + 4 + TEXT_CAPACITY;

/// Sender id used by the host
pub const HOST_ID: i32 = -1;

/// Target id meaning "deliver to every connected client"
pub const TARGET_BROADCAST: i32 = -1;

/// Target id marking a control message consumed by the host
pub const TARGET_SYSTEM: i32 = -2;

const TIMESTAMP_RANGE: std::ops::Range<usize> = 0..8;
const SENDER_RANGE: std::ops::Range<usize> = 8..12;
const TARGET_RANGE: std::ops::Range<usize> = 12..16;
const TEXT_OFFSET: usize = 16;

/// Identifier of a client connection (0..N)
///
/// Resource names for a connection are derived from this value, so the
/// creator and joiner agree on identity without a separate handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u32);

impl ClientId {
    /// Create a client id from its index
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// The value carried in `sender_id`/`target_id` fields
    #[must_use]
    pub fn as_wire(self) -> i32 {
        i32::try_from(self.0).unwrap_or(i32::MAX)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors decoding a record from bytes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Buffer is not exactly one record long
    #[error("record must be exactly {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required size
        expected: usize,
        /// Size that was supplied
        actual: usize,
    },
}

/// Where a message is headed, decoded from `target_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every registered client
    Broadcast,
    /// The host itself (readiness signals)
    System,
    /// A single client
    Client(ClientId),
    /// A value with no meaning (negative, not a sentinel)
    Invalid(i32),
}

impl Target {
    /// Classify a raw `target_id`
    #[must_use]
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            TARGET_BROADCAST => Self::Broadcast,
            TARGET_SYSTEM => Self::System,
            n => u32::try_from(n).map_or(Self::Invalid(n), |i| Self::Client(ClientId::new(i))),
        }
    }
}

/// Control keywords a client sends with [`TARGET_SYSTEM`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemSignal {
    /// Transport is connected
    Ready,
    /// Client loop is about to block on reads
    Listening,
}

impl SystemSignal {
    /// Keyword carried in the text field
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Listening => "listening",
        }
    }

    /// Parse a keyword, returning `None` for anything unrecognised
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ready" => Some(Self::Ready),
            "listening" => Some(Self::Listening),
            _ => None,
        }
    }
}

/// Fixed-layout chat record
///
/// Copied by value across the transport boundary.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Wall-clock seconds when the record was built
    pub timestamp: i64,
    /// Originating client, or [`HOST_ID`]
    pub sender_id: i32,
    /// Client index, [`TARGET_BROADCAST`] or [`TARGET_SYSTEM`]
    pub target_id: i32,
    /// NUL-terminated text
    pub text: [u8; TEXT_CAPACITY],
}

impl Default for Message {
    fn default() -> Self {
        Self {
            timestamp: 0,
            sender_id: 0,
            target_id: 0,
            text: [0; TEXT_CAPACITY],
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("timestamp", &self.timestamp)
            .field("sender_id", &self.sender_id)
            .field("target_id", &self.target_id)
            .field("text", &self.text())
            .finish()
    }
}

impl Message {
    /// Build a message stamped with the current time
    ///
    /// Text longer than `TEXT_CAPACITY - 1` bytes is truncated on a
    /// character boundary.
    #[must_use]
    pub fn new(sender_id: i32, target_id: i32, text: &str) -> Self {
        let mut msg = Self {
            timestamp: chrono::Utc::now().timestamp(),
            sender_id,
            target_id,
            text: [0; TEXT_CAPACITY],
        };
        msg.set_text(text);
        msg
    }

    /// Host message to every client
    #[must_use]
    pub fn broadcast(sender_id: i32, text: &str) -> Self {
        Self::new(sender_id, TARGET_BROADCAST, text)
    }

    /// Message to a single client
    #[must_use]
    pub fn direct(sender_id: i32, target: ClientId, text: &str) -> Self {
        Self::new(sender_id, target.as_wire(), text)
    }

    /// Control message from a client to the host
    #[must_use]
    pub fn system(sender: ClientId, signal: SystemSignal) -> Self {
        Self::new(sender.as_wire(), TARGET_SYSTEM, signal.keyword())
    }

    /// Replace the text, zero-filling the rest of the buffer
    pub fn set_text(&mut self, text: &str) {
        let mut end = text.len().min(TEXT_CAPACITY - 1);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.text = [0; TEXT_CAPACITY];
        self.text[..end].copy_from_slice(&text.as_bytes()[..end]);
    }

    /// Text up to the first NUL (the whole buffer if none)
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        let end = self
            .text
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TEXT_CAPACITY);
        String::from_utf8_lossy(&self.text[..end])
    }

    /// Decoded destination
    #[must_use]
    pub fn target(&self) -> Target {
        Target::from_wire(self.target_id)
    }

    /// True when the host sent this message
    #[must_use]
    pub fn is_from_host(&self) -> bool {
        self.sender_id == HOST_ID
    }

    /// Encode into the fixed wire layout
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MESSAGE_SIZE] {
        let mut buf = [0u8; MESSAGE_SIZE];
        buf[TIMESTAMP_RANGE].copy_from_slice(&self.timestamp.to_ne_bytes());
        buf[SENDER_RANGE].copy_from_slice(&self.sender_id.to_ne_bytes());
        buf[TARGET_RANGE].copy_from_slice(&self.target_id.to_ne_bytes());
        buf[TEXT_OFFSET..].copy_from_slice(&self.text);
        buf
    }

    /// Decode from exactly one record's worth of bytes
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidLength`] if `bytes` is not [`MESSAGE_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() != MESSAGE_SIZE {
            return Err(WireError::InvalidLength {
                expected: MESSAGE_SIZE,
                actual: bytes.len(),
            });
        }

        let mut timestamp = [0u8; 8];
        let mut sender = [0u8; 4];
        let mut target = [0u8; 4];
        let mut text = [0u8; TEXT_CAPACITY];
        timestamp.copy_from_slice(&bytes[TIMESTAMP_RANGE]);
        sender.copy_from_slice(&bytes[SENDER_RANGE]);
        target.copy_from_slice(&bytes[TARGET_RANGE]);
        text.copy_from_slice(&bytes[TEXT_OFFSET..]);

        Ok(Self {
            timestamp: i64::from_ne_bytes(timestamp),
            sender_id: i32::from_ne_bytes(sender),
            target_id: i32::from_ne_bytes(target),
            text,
        })
    }
}
