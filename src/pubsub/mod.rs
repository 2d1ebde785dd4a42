//! Publish/Subscribe Module
//!
//! Topic-based fan-out between client sessions.
//!
//! ```text
//!   SEND news hi                          SUBSCRIBE news
//!  ┌────────────┐                         ┌────────────┐
//!  │ Session A  │                         │ Session B  │
//!  └─────┬──────┘                         └─────▲──────┘
//!        │ publish()                            │ write line
//!        ▼                                      │
//!  ┌──────────────────┐  try_send   ┌───────────┴──────┐
//!  │  TopicRegistry   │────────────>│ B's mailbox      │
//!  │  topic -> [mbox] │             │ (bounded mpsc)   │
//!  └──────────────────┘             └──────────────────┘
//! ```
//!
//! The publisher never waits on a subscriber: delivery is a non-blocking
//! enqueue, and each session drains its own mailbox on a separate task.

pub mod registry;

pub use registry::{
    Mailbox, PubSubStats, PublishReport, SessionId, TopicRegistry, DEFAULT_MAILBOX_CAPACITY,
};
