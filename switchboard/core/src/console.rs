//! Operator Console Commands
//!
//! ```text
//! all:<text>        broadcast to every client
//! to <id>:<text>    send to one client
//! quit | exit       shut the host down
//! ```

use thiserror::Error;

use crate::messages::ClientId;

/// Printed at startup and after a rejected line
pub const USAGE: &[&str] = &[
    "  all:<message>       - broadcast to all",
    "  to <id>:<message>   - send to specific client",
    "  quit                - shutdown server",
];

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send to every client
    Broadcast(String),
    /// Send to one client
    Direct {
        /// Destination
        target: ClientId,
        /// Message text
        text: String,
    },
    /// Shut down
    Quit,
}

/// Why a line was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Nothing after `all:` or after the id's colon
    #[error("empty message")]
    EmptyText,

    /// `to` without a colon, or an id that is not a number
    #[error("invalid command format")]
    BadFormat,

    /// Id outside the configured client range
    #[error("invalid target id {0}")]
    BadTarget(i64),

    /// Anything else
    #[error("unknown command, use 'all:<msg>' or 'to <id>:<msg>'")]
    Unknown,
}

/// Parse one input line
///
/// Trailing `\r` is stripped and blank lines yield `Ok(None)`. Target ids
/// are checked against `clients`.
///
/// # Errors
///
/// Returns a [`CommandError`] describing why the line was rejected.
pub fn parse(line: &str, clients: u32) -> Result<Option<Command>, CommandError> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Ok(None);
    }

    if line == "quit" || line == "exit" {
        return Ok(Some(Command::Quit));
    }

    if let Some(text) = line.strip_prefix("all:") {
        if text.is_empty() {
            return Err(CommandError::EmptyText);
        }
        return Ok(Some(Command::Broadcast(text.to_string())));
    }

    if let Some(rest) = line.strip_prefix("to ") {
        let (num, text) = rest.split_once(':').ok_or(CommandError::BadFormat)?;
        let raw: i64 = num.trim().parse().map_err(|_| CommandError::BadFormat)?;
        let target = u32::try_from(raw)
            .ok()
            .filter(|&n| n < clients)
            .map(ClientId::new)
            .ok_or(CommandError::BadTarget(raw))?;
        if text.is_empty() {
            return Err(CommandError::EmptyText);
        }
        return Ok(Some(Command::Direct {
            target,
            text: text.to_string(),
        }));
    }

    Err(CommandError::Unknown)
}
