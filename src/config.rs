//! Database configuration.

use crate::pubsub::DEFAULT_MAILBOX_CAPACITY;
use crate::storage::expiry::DEFAULT_SWEEP_INTERVAL;
use crate::storage::snapshot::DEFAULT_PERSIST_INTERVAL;
use crate::storage::{ExpiryConfig, PersistConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Default snapshot file, relative to the working directory.
pub const DEFAULT_SNAPSHOT_PATH: &str = "cache.txt";

/// Settings for opening a [`Database`](crate::server::Database).
///
/// # Example
///
/// ```
/// use tidekv::DatabaseConfig;
/// use std::time::Duration;
///
/// let config = DatabaseConfig::default()
///     .with_snapshot_path("/var/lib/tidekv/cache.txt")
///     .with_persist_interval(Duration::from_secs(10));
/// assert_eq!(config.mailbox_capacity, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Snapshot file location (default: `cache.txt`)
    pub snapshot_path: PathBuf,
    /// Interval between expiry sweeps (default: 5 minutes)
    pub sweep_interval: Duration,
    /// Interval between snapshot saves (default: 1 minute)
    pub persist_interval: Duration,
    /// Pending pushed messages per session before new ones are dropped
    /// (default: 1024)
    pub mailbox_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl DatabaseConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    /// Sets how often the background sweep removes expired records.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets how often the store is written to the snapshot file.
    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    /// Sets the per-session mailbox capacity. Zero is raised to one, since a
    /// mailbox must hold at least one message.
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    pub(crate) fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: self.sweep_interval,
        }
    }

    pub(crate) fn persist(&self) -> PersistConfig {
        PersistConfig {
            path: self.snapshot_path.clone(),
            interval: self.persist_interval,
        }
    }
}
