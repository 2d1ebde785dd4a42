//! Topic Registry
//!
//! Maps topic names to the mailboxes of the sessions subscribed to them.
//!
//! ## Delivery
//!
//! `publish` walks a topic's subscribers in registration order and hands each
//! one the message with a non-blocking `try_send`. A slow or dead subscriber
//! can therefore never stall the publisher or the other subscribers.
//!
//! Backpressure policy: **drop newest**. Every mailbox is a bounded channel;
//! when it is full the new message is discarded for that subscriber only and
//! the drop is logged and counted.
//!
//! ## Lifetime
//!
//! A registration lives exactly as long as its session:
//! - the session calls [`TopicRegistry::unsubscribe_all`] on teardown, and
//! - `publish` prunes any mailbox whose receiver has gone away (covers
//!   sessions that died without reaching teardown).
//!
//! A session is registered at most once per topic.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Default number of undelivered messages a mailbox can hold.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Identifies one client session.
pub type SessionId = u64;

/// The sending side of a session's mailbox.
///
/// Cloned into the registry for every topic the session subscribes to. The
/// matching receiver is drained by the session's delivery task.
#[derive(Debug, Clone)]
pub struct Mailbox {
    session_id: SessionId,
    tx: mpsc::Sender<String>,
}

impl Mailbox {
    /// Creates a mailbox for `session_id` holding at most `capacity` messages.
    pub fn channel(session_id: SessionId, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { session_id, tx }, rx)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// True once the session's delivery task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Per-call outcome of [`TopicRegistry::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Mailboxes that accepted the message
    pub delivered: usize,
    /// Mailboxes that were full (message dropped for them)
    pub dropped: usize,
    /// Mailboxes found closed and removed
    pub pruned: usize,
}

/// Publish/subscribe statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PubSubStats {
    pub topics: usize,
    pub messages_published: u64,
    pub deliveries: u64,
    pub deliveries_dropped: u64,
}

/// The topic -> subscribers table.
///
/// Designed to be wrapped in an `Arc` and shared by every session.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Vec<Mailbox>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `mailbox` for `topic`.
    ///
    /// Returns `false` if the session was already subscribed.
    pub fn subscribe(&self, topic: &str, mailbox: &Mailbox) -> bool {
        let mut topics = self.topics.write();
        let subscribers = topics.entry(topic.to_string()).or_default();

        if subscribers
            .iter()
            .any(|m| m.session_id == mailbox.session_id)
        {
            return false;
        }

        subscribers.push(mailbox.clone());
        debug!(topic = %topic, session = mailbox.session_id, "Subscribed");
        true
    }

    /// Removes one session from one topic.
    ///
    /// Returns `false` if the session was not subscribed.
    pub fn unsubscribe(&self, topic: &str, session_id: SessionId) -> bool {
        let mut topics = self.topics.write();

        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|m| m.session_id != session_id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Removes a session from every topic. Called when the session ends.
    ///
    /// Returns the number of registrations removed.
    pub fn unsubscribe_all(&self, session_id: SessionId) -> usize {
        let mut topics = self.topics.write();
        let mut removed = 0;

        topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|m| m.session_id != session_id);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });

        if removed > 0 {
            debug!(session = session_id, registrations = removed, "Session deregistered");
        }
        removed
    }

    /// Delivers `message` to every mailbox subscribed to `topic`.
    ///
    /// Never blocks: full mailboxes drop the message, closed ones are pruned.
    pub fn publish(&self, topic: &str, message: &str) -> PublishReport {
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut report = PublishReport::default();
        let mut saw_closed = false;

        {
            let topics = self.topics.read();
            let Some(subscribers) = topics.get(topic) else {
                trace!(topic = %topic, "Published to topic with no subscribers");
                return report;
            };

            for mailbox in subscribers {
                match mailbox.tx.try_send(message.to_string()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        report.dropped += 1;
                        warn!(
                            topic = %topic,
                            session = mailbox.session_id,
                            "Mailbox full, dropping message"
                        );
                    }
                    Err(TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }

        if saw_closed {
            report.pruned = self.prune_closed(topic);
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped.fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    /// Drops closed mailboxes from `topic`, returning how many were removed.
    fn prune_closed(&self, topic: &str) -> usize {
        let mut topics = self.topics.write();

        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };
        let before = subscribers.len();
        subscribers.retain(|m| !m.is_closed());
        let pruned = before - subscribers.len();

        if subscribers.is_empty() {
            topics.remove(topic);
        }
        if pruned > 0 {
            debug!(topic = %topic, pruned = pruned, "Pruned closed mailboxes");
        }
        pruned
    }

    /// Number of subscribers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    pub fn stats(&self) -> PubSubStats {
        PubSubStats {
            topics: self.topic_count(),
            messages_published: self.published.load(Ordering::Relaxed),
            deliveries: self.delivered.load(Ordering::Relaxed),
            deliveries_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
