//! Protocol Data Types
//!
//! TideKV speaks a plain-text, newline-delimited protocol: one command per
//! line in, exactly one response line out.
//!
//! ## Commands
//!
//! ```text
//! GET <key>
//! SET <key> <value> <ttlSeconds>
//! DELETE <key>
//! SUBSCRIBE <topic>
//! UNSUBSCRIBE <topic>
//! SEND <topic> <message...>
//! ```
//!
//! ## Responses
//!
//! ```text
//! <value> | NULL
//! <value> | Invalid TTL
//! Record removed | Record doesn't exist
//! Subscribed to channel <topic>
//! Unsubscribed from channel <topic> | Not subscribed to channel <topic>
//! Published to the channel: <topic>
//! Invalid command
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Line terminator for everything the server writes.
pub const LF: &[u8] = b"\n";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: String },
    Set {
        key: String,
        value: String,
        /// Raw TTL field; validated by the store
        ttl: Option<String>,
    },
    Delete { key: String },
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Send { topic: String, message: String },
}

impl Command {
    /// The upper-case command name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::Delete { .. } => "DELETE",
            Command::Subscribe { .. } => "SUBSCRIBE",
            Command::Unsubscribe { .. } => "UNSUBSCRIBE",
            Command::Send { .. } => "SEND",
        }
    }
}

/// A single response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A stored value (GET hit, or the value just written by SET)
    Value(String),
    /// GET on an absent or expired key
    Null,
    /// SET with a missing or non-numeric TTL
    InvalidTtl,
    /// DELETE removed a record
    Removed,
    /// DELETE on an absent key
    NotFound,
    Subscribed(String),
    Unsubscribed(String),
    NotSubscribed(String),
    Published(String),
    /// Anything that failed to parse
    InvalidCommand,
}

impl Response {
    /// Serializes the response as a newline-terminated line.
    pub fn serialize(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + LF.len());
        buf.put_slice(text.as_bytes());
        buf.put_slice(LF);
        buf.freeze()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Value(v) => write!(f, "{}", v),
            Response::Null => write!(f, "NULL"),
            Response::InvalidTtl => write!(f, "Invalid TTL"),
            Response::Removed => write!(f, "Record removed"),
            Response::NotFound => write!(f, "Record doesn't exist"),
            Response::Subscribed(topic) => write!(f, "Subscribed to channel {}", topic),
            Response::Unsubscribed(topic) => write!(f, "Unsubscribed from channel {}", topic),
            Response::NotSubscribed(topic) => write!(f, "Not subscribed to channel {}", topic),
            Response::Published(topic) => write!(f, "Published to the channel: {}", topic),
            Response::InvalidCommand => write!(f, "Invalid command"),
        }
    }
}

/// Frames a pushed pub/sub message as a line.
pub fn message_line(message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(message.len() + LF.len());
    buf.put_slice(message.as_bytes());
    buf.put_slice(LF);
    buf.freeze()
}
