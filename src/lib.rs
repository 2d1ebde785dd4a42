//! # TideKV - An In-Memory Key-Value Store with Expiry and Pub/Sub
//!
//! TideKV is a small networked key-value server. Every record carries an
//! expiry time, the store is periodically snapshotted to disk and reloaded at
//! startup, and clients can publish messages to topics that other clients
//! subscribe to.
//!
//! ## Features
//!
//! - **Per-key expiry**: every `SET` carries a TTL in seconds
//! - **Snapshots**: the whole store is written to a text file every minute
//! - **Pub/Sub**: topic fan-out pushed to subscribers as it happens
//! - **Async I/O**: built on Tokio, one task per client session
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TideKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────▲──────┘    └──┬───────┬──┘                  │
//! │                            │ push         │       │                     │
//! │                     ┌──────┴────────┐     │       ▼                     │
//! │                     │ TopicRegistry │<────┘  ┌──────────────────────┐   │
//! │                     │  (mailboxes)  │        │        Store         │   │
//! │                     └───────────────┘        │  64 RwLock shards    │   │
//! │                                              └──────────────────────┘   │
//! │                                                   ▲            ▲        │
//! │                                     ┌─────────────┴─┐  ┌───────┴──────┐ │
//! │                                     │ExpirySweeper  │  │  Snapshot    │ │
//! │                                     │ (every 5 min) │  │  Persister   │ │
//! │                                     └───────────────┘  └──────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use tidekv::{Database, DatabaseConfig};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Database::open(DatabaseConfig::default()).await?;
//!     let listener = TcpListener::bind("127.0.0.1:6379").await?;
//!
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         db.handle_connection(stream, addr);
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `GET key`
//! - `SET key value ttlSeconds`
//! - `DELETE key`
//! - `SUBSCRIBE topic` / `UNSUBSCRIBE topic`
//! - `SEND topic message...`
//!
//! ## Module Overview
//!
//! - [`protocol`]: line framing, command parsing and response types
//! - [`storage`]: sharded record store, expiry sweeper and snapshots
//! - [`pubsub`]: topic registry and session mailboxes
//! - [`commands`]: per-session command dispatch
//! - [`connection`]: client session management
//! - [`server`]: database lifecycle
//! - [`config`]: database settings
//!
//! ## Lazy + Active Expiry
//!
//! Records are expired in two ways:
//! 1. **Lazy**: a read that finds an expired record removes it and misses
//! 2. **Active**: a background task periodically removes every expired record

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::DatabaseConfig;
pub use connection::{ConnectionError, ConnectionStats};
pub use protocol::{Command, ParseError, Response};
pub use pubsub::TopicRegistry;
pub use server::{Database, DatabaseStats};
pub use storage::{SnapshotError, Store, StoreError};

/// The default port TideKV listens on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
