//! Command Handler
//!
//! Executes parsed commands on behalf of one session and produces the
//! response line to send back.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │   parse()   │───>│  dispatch() │───>│  execute()  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                          │          │       │
//! │                                          ▼          ▼       │
//! │                                      Store   TopicRegistry  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! One handler is created per connection. It carries the session's mailbox so
//! that `SUBSCRIBE` can register it with the topic registry.

use crate::protocol::{parse_command, Command, Response};
use crate::pubsub::{Mailbox, TopicRegistry};
use crate::storage::Store;
use std::sync::Arc;
use tracing::trace;

/// Dispatches commands for a single session.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    store: Arc<Store>,
    topics: Arc<TopicRegistry>,
    /// This session's delivery mailbox
    mailbox: Mailbox,
}

impl CommandHandler {
    /// Creates a handler for the session owning `mailbox`.
    pub fn new(store: Arc<Store>, topics: Arc<TopicRegistry>, mailbox: Mailbox) -> Self {
        Self {
            store,
            topics,
            mailbox,
        }
    }

    /// Parses and executes one raw command line.
    ///
    /// Malformed input never fails: it produces `Response::InvalidCommand`.
    pub fn execute_line(&self, line: &[u8]) -> Response {
        match parse_command(line) {
            Ok(command) => self.execute(command),
            Err(e) => {
                trace!(session = self.mailbox.session_id(), error = %e, "Rejected command");
                Response::InvalidCommand
            }
        }
    }

    /// Executes a parsed command and returns the response.
    pub fn execute(&self, command: Command) -> Response {
        trace!(
            session = self.mailbox.session_id(),
            command = command.name(),
            "Executing command"
        );

        match command {
            Command::Get { key } => self.cmd_get(&key),
            Command::Set { key, value, ttl } => self.cmd_set(key, value, ttl.as_deref()),
            Command::Delete { key } => self.cmd_delete(&key),
            Command::Subscribe { topic } => self.cmd_subscribe(topic),
            Command::Unsubscribe { topic } => self.cmd_unsubscribe(topic),
            Command::Send { topic, message } => self.cmd_send(topic, &message),
        }
    }

    /// GET key
    fn cmd_get(&self, key: &str) -> Response {
        match self.store.get(key) {
            Some(value) => Response::Value(value),
            None => Response::Null,
        }
    }

    /// SET key value ttl
    fn cmd_set(&self, key: String, value: String, ttl: Option<&str>) -> Response {
        match self.store.put(key, value, ttl) {
            Ok(written) => Response::Value(written),
            Err(_) => Response::InvalidTtl,
        }
    }

    /// DELETE key
    fn cmd_delete(&self, key: &str) -> Response {
        if self.store.delete(key) {
            Response::Removed
        } else {
            Response::NotFound
        }
    }

    /// SUBSCRIBE topic
    fn cmd_subscribe(&self, topic: String) -> Response {
        // Already subscribed is still a success from the client's view
        self.topics.subscribe(&topic, &self.mailbox);
        Response::Subscribed(topic)
    }

    /// UNSUBSCRIBE topic
    fn cmd_unsubscribe(&self, topic: String) -> Response {
        if self.topics.unsubscribe(&topic, self.mailbox.session_id()) {
            Response::Unsubscribed(topic)
        } else {
            Response::NotSubscribed(topic)
        }
    }

    /// SEND topic message
    fn cmd_send(&self, topic: String, message: &str) -> Response {
        self.topics.publish(&topic, message);
        Response::Published(topic)
    }
}
