//! Thread-Safe Record Store with Expiry Support
//!
//! This module implements the core storage engine for TideKV: a concurrent
//! map from key to [`Record`], where every record carries an absolute expiry
//! timestamp.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, we use multiple shards to reduce contention.
//! 2. **Lazy Expiry**: Records are checked for expiry on access, plus background cleanup.
//! 3. **Lock Upgrade on Removal**: Reads run under a shard read lock; removing a
//!    stale record re-acquires the shard write lock and re-checks expiry first.
//! 4. **Wall-Clock Expiry**: Expiry is a `DateTime<Utc>` so it can be persisted
//!    in snapshots and restored after a restart.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Store                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys are distributed across shards using a hash function.

use crate::storage::clock::{Clock, SystemClock};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Number of shards for the store.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 64;

/// Errors returned by store mutations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The TTL was missing, not an integer, or too large to represent.
    #[error("invalid TTL: {0:?}")]
    InvalidTtl(String),
}

/// A stored value plus its expiry time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The stored value
    pub value: String,
    /// The instant after which the record is treated as absent
    pub expires_at: DateTime<Utc>,
}

impl Record {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Checks if this record has expired as of `now`.
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A single shard containing a portion of the records.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<String, Record>>,
}

/// The record store.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all session tasks and the background sweeper and persister.
///
/// # Example
///
/// ```
/// use tidekv::storage::Store;
///
/// let store = Store::new();
///
/// store.put("name", "Ariz", Some("60")).unwrap();
/// assert_eq!(store.get("name"), Some("Ariz".to_string()));
///
/// // Missing or non-numeric TTLs are rejected without touching the store
/// assert!(store.put("name", "other", Some("abc")).is_err());
/// assert_eq!(store.get("name"), Some("Ariz".to_string()));
/// ```
pub struct Store {
    shards: Vec<Shard>,

    clock: Arc<dyn Clock>,

    /// Statistics: total number of physically present records (approximate)
    key_count: AtomicU64,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: total DELETE operations
    del_count: AtomicU64,

    /// Statistics: number of expired records removed (lazily or by the sweeper)
    expired_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a new store backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a new store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let shards = (0..NUM_SHARDS).map(|_| Shard::default()).collect();

        Self {
            shards,
            clock,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Returns the current time according to the store's clock.
    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn get_shard(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Parses `ttl` and stores the record.
    ///
    /// `ttl` must be present and parse as a whole number of seconds. Zero and
    /// negative values are accepted and produce a record that is already
    /// expired. On error the store is left untouched.
    ///
    /// Returns the value that was written.
    pub fn put(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Option<&str>,
    ) -> Result<String, StoreError> {
        let raw = ttl.ok_or_else(|| StoreError::InvalidTtl(String::new()))?;
        let secs: i64 = raw
            .parse()
            .map_err(|_| StoreError::InvalidTtl(raw.to_string()))?;

        let value = value.into();
        self.set(key, value.clone(), secs)?;
        Ok(value)
    }

    /// Stores `value` under `key`, expiring `ttl_secs` seconds from now.
    ///
    /// Overwrites any existing record, including its expiry.
    ///
    /// # Returns
    ///
    /// Returns `true` if a new key was created, `false` if an existing key was updated.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl_secs: i64,
    ) -> Result<bool, StoreError> {
        let expires_at = TimeDelta::try_seconds(ttl_secs)
            .and_then(|ttl| self.now().checked_add_signed(ttl))
            .ok_or_else(|| StoreError::InvalidTtl(ttl_secs.to_string()))?;

        Ok(self.insert_record(key.into(), Record::new(value, expires_at)))
    }

    /// Inserts a record as-is, without looking at its expiry.
    ///
    /// Used when hydrating from a snapshot: records that expired while the
    /// server was down stay until they are read or swept.
    pub fn insert_record(&self, key: String, record: Record) -> bool {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(&key);
        let mut data = shard.data.write();

        let is_new = data.insert(key, record).is_none();
        if is_new {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        is_new
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    /// This implements "lazy expiry" - expired records are detected and removed on access.
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);
        let now = self.now();

        // First, try a read lock (fast path for existing, non-expired records)
        {
            let data = shard.data.read();
            match data.get(key) {
                Some(record) if !record.is_expired(now) => return Some(record.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Record exists but is expired - need write lock to remove it
        let mut data = shard.data.write();
        if let Some(record) = data.get(key) {
            if record.is_expired(now) {
                data.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            // Race: another session rewrote the key between the two locks
            return Some(record.value.clone());
        }

        None
    }

    /// Deletes a key from the store.
    ///
    /// A record that has already expired counts as absent: it is removed,
    /// but the call still reports `false`.
    ///
    /// # Returns
    ///
    /// Returns `true` if a live record was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &str) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let shard = self.get_shard(key);
        let now = self.now();
        let mut data = shard.data.write();

        match data.remove(key) {
            Some(record) => {
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                if record.is_expired(now) {
                    self.expired_count.fetch_add(1, Ordering::Relaxed);
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// Removes every record that has expired as of a single timestamp.
    ///
    /// This is called by the background expiry sweeper. Each shard is
    /// swept under its write lock.
    ///
    /// # Returns
    ///
    /// Returns the number of records that were removed.
    pub fn purge_expired(&self) -> u64 {
        let now = self.now();
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut data = shard.data.write();
            let before = data.len();

            data.retain(|_, record| !record.is_expired(now));

            cleaned += (before - data.len()) as u64;
        }

        if cleaned > 0 {
            self.key_count.fetch_sub(cleaned, Ordering::Relaxed);
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }

        cleaned
    }

    /// Copies out every physically present record, expired or not.
    ///
    /// Shards are visited one at a time, so the result is consistent per
    /// shard but not across shards. Ordering is unspecified.
    pub fn records(&self) -> Vec<(String, Record)> {
        let mut out = Vec::with_capacity(self.len() as usize);

        for shard in &self.shards {
            let data = shard.data.read();
            out.extend(data.iter().map(|(k, r)| (k.clone(), r.clone())));
        }

        out
    }

    /// Returns the approximate number of physically present records.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.key_count.load(Ordering::Relaxed),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of records currently stored
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations (including snapshot hydration)
    pub set_ops: u64,
    /// Total DELETE operations
    pub del_ops: u64,
    /// Total expired records removed
    pub expired: u64,
}
