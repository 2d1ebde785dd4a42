//! Storage Module
//!
//! This module provides the core storage functionality for TideKV:
//! a thread-safe, sharded record store with per-key expiry, the background
//! expiry sweeper, and snapshot persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!               ▲                              ▲
//!               │                              │
//!  ┌────────────┴──────────────┐  ┌────────────┴──────────────┐
//!  │     ExpirySweeper         │  │   SnapshotPersister       │
//!  │  (Background Tokio Task)  │  │  (Background Tokio Task)  │
//!  └───────────────────────────┘  └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use tidekv::storage::Store;
//!
//! let store = Store::new();
//!
//! store.put("session", "token123", Some("3600")).unwrap();
//! assert_eq!(store.get("session"), Some("token123".to_string()));
//!
//! assert!(store.delete("session"));
//! assert_eq!(store.get("session"), None);
//! ```

pub mod clock;
pub mod engine;
pub mod expiry;
pub mod snapshot;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Record, StorageStats, Store, StoreError};
pub use expiry::{ExpiryConfig, ExpirySweeper};
pub use snapshot::{LoadReport, PersistConfig, SnapshotError, SnapshotPersister};
