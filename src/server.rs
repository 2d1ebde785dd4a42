//! Database lifecycle.
//!
//! [`Database`] owns everything a running TideKV instance needs: the record
//! store, the topic registry, both background tasks and the set of live
//! sessions. The binary's accept loop only hands it sockets.
//!
//! ```text
//!   open()                      handle_connection()            shutdown()
//!     │                               │                            │
//!     ├─ load snapshot                ├─ assign session id         ├─ signal sessions
//!     ├─ start ExpirySweeper          └─ spawn ConnectionHandler   ├─ join sessions
//!     └─ start SnapshotPersister                                   ├─ stop sweeper
//!                                                                  └─ stop persister
//!                                                                     (final save)
//! ```

use crate::config::DatabaseConfig;
use crate::connection::{handle_connection, ConnectionStats, SessionContext};
use crate::pubsub::{PubSubStats, SessionId, TopicRegistry};
use crate::storage::snapshot;
use crate::storage::{
    Clock, ExpirySweeper, SnapshotError, SnapshotPersister, StorageStats, Store, SystemClock,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How long shutdown waits for sessions to unwind before aborting them.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time counters for the whole database.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub storage: StorageStats,
    pub pubsub: PubSubStats,
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub commands_processed: u64,
    pub messages_pushed: u64,
}

/// A running TideKV instance.
pub struct Database {
    config: DatabaseConfig,
    store: Arc<Store>,
    topics: Arc<TopicRegistry>,
    stats: Arc<ConnectionStats>,
    next_session_id: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    sessions: Mutex<JoinSet<()>>,
    sweeper: Mutex<Option<ExpirySweeper>>,
    persister: Mutex<Option<SnapshotPersister>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("keys", &self.store.len())
            .field("topics", &self.topics.topic_count())
            .finish()
    }
}

impl Database {
    /// Opens the database: hydrates the store from the snapshot file and
    /// starts the expiry sweeper and snapshot persister.
    ///
    /// A missing snapshot is a cold start. A snapshot that exists but cannot
    /// be read is an error.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(config: DatabaseConfig) -> Result<Self, SnapshotError> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Like [`open`](Self::open), but expiry is judged against `clock`.
    pub async fn open_with_clock(
        config: DatabaseConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SnapshotError> {
        let store = Arc::new(Store::with_clock(clock));
        snapshot::load(&config.snapshot_path, &store).await?;

        let sweeper = ExpirySweeper::start(Arc::clone(&store), config.expiry());
        let persister = SnapshotPersister::start(Arc::clone(&store), config.persist());
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            snapshot = %config.snapshot_path.display(),
            keys = store.len(),
            "Database opened"
        );

        Ok(Self {
            config,
            store,
            topics: Arc::new(TopicRegistry::new()),
            stats: Arc::new(ConnectionStats::new()),
            next_session_id: AtomicU64::new(1),
            shutdown_tx,
            sessions: Mutex::new(JoinSet::new()),
            sweeper: Mutex::new(Some(sweeper)),
            persister: Mutex::new(Some(persister)),
        })
    }

    /// Returns the record store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Returns the topic registry.
    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.topics
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            storage: self.store.stats(),
            pubsub: self.topics.stats(),
            connections_accepted: self.stats.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            commands_processed: self.stats.commands_processed.load(Ordering::Relaxed),
            messages_pushed: self.stats.messages_pushed.load(Ordering::Relaxed),
        }
    }

    /// Starts a session for an accepted connection.
    ///
    /// The session runs as its own task until the client leaves or the
    /// database shuts down.
    pub fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let session_id: SessionId = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let ctx = SessionContext {
            session_id,
            store: Arc::clone(&self.store),
            topics: Arc::clone(&self.topics),
            stats: Arc::clone(&self.stats),
            shutdown: self.shutdown_tx.subscribe(),
            mailbox_capacity: self.config.mailbox_capacity,
        };

        let mut sessions = self.sessions.lock();
        // Reap finished sessions so the set only tracks live ones
        while sessions.try_join_next().is_some() {}
        sessions.spawn(handle_connection(stream, addr, ctx));
    }

    /// Shuts the database down.
    ///
    /// Live sessions are told to close and joined, then the sweeper stops and
    /// the persister writes a final snapshot. Calling this twice is harmless.
    pub async fn shutdown(&self) {
        info!("Shutting down database");
        self.shutdown_tx.send_replace(true);

        let mut sessions = std::mem::take(&mut *self.sessions.lock());
        let live = sessions.len();
        let drained = tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "Sessions did not close in time, aborting"
            );
            sessions.shutdown().await;
        }
        debug!(sessions = live, "Sessions closed");

        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }

        let persister = self.persister.lock().take();
        if let Some(persister) = persister {
            persister.stop().await;
        }

        info!(keys = self.store.len(), "Database shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ManualClock;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn test_config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig::default()
            .with_snapshot_path(dir.path().join("cache.txt"))
            .with_persist_interval(Duration::from_secs(3600))
    }

    /// Starts an accept loop for `db` on an ephemeral port.
    async fn serve(db: Arc<Database>) -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                db.handle_connection(stream, peer);
            }
        });

        (addr, handle)
    }

    struct Client {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (reader, writer) = stream.into_split();
            Self {
                reader: BufReader::new(reader),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }

        async fn recv(&mut self) -> String {
            let mut line = String::new();
            tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a line")
                .unwrap();
            line.trim_end_matches('\n').to_string()
        }

        async fn call(&mut self, line: &str) -> String {
            self.send(line).await;
            self.recv().await
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_key_value_over_tcp() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(test_config(&dir)).await.unwrap());
        let (addr, accept) = serve(Arc::clone(&db)).await;
        let mut client = Client::connect(addr).await;

        assert_eq!(client.call("SET name Ariz 60").await, "Ariz");
        assert_eq!(client.call("GET name").await, "Ariz");
        assert_eq!(client.call("SET name Mo abc").await, "Invalid TTL");
        assert_eq!(client.call("GET name").await, "Ariz");
        assert_eq!(client.call("DELETE name").await, "Record removed");
        assert_eq!(client.call("DELETE name").await, "Record doesn't exist");
        assert_eq!(client.call("GET name").await, "NULL");
        assert_eq!(client.call("PING").await, "Invalid command");

        accept.abort();
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_pubsub_between_clients_in_order() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(test_config(&dir)).await.unwrap());
        let (addr, accept) = serve(Arc::clone(&db)).await;

        let mut alice = Client::connect(addr).await;
        let mut bob = Client::connect(addr).await;

        assert_eq!(alice.call("SUBSCRIBE news").await, "Subscribed to channel news");
        for i in 0..10 {
            assert_eq!(
                bob.call(&format!("SEND news update {}", i)).await,
                "Published to the channel: news"
            );
        }
        for i in 0..10 {
            assert_eq!(alice.recv().await, format!("update {}", i));
        }

        // The subscriber keeps answering commands between pushes
        assert_eq!(alice.call("GET missing").await, "NULL");

        accept.abort();
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_session_is_deregistered() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(test_config(&dir)).await.unwrap());
        let (addr, accept) = serve(Arc::clone(&db)).await;

        let mut subscriber = Client::connect(addr).await;
        subscriber.call("SUBSCRIBE a").await;
        subscriber.call("SUBSCRIBE b").await;
        assert_eq!(db.topics().topic_count(), 2);

        drop(subscriber);
        wait_for(|| db.topics().topic_count() == 0).await;
        wait_for(|| db.stats().active_connections == 0).await;

        let mut publisher = Client::connect(addr).await;
        assert_eq!(publisher.call("SEND a hi").await, "Published to the channel: a");
        assert_eq!(db.stats().pubsub.deliveries, 0);

        accept.abort();
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(test_config(&dir)).await.unwrap());
        let (addr, accept) = serve(Arc::clone(&db)).await;

        let mut client = Client::connect(addr).await;
        assert_eq!(client.call("SET k v 60").await, "v");

        accept.abort();
        db.shutdown().await;

        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(db.stats().active_connections, 0);
    }

    #[tokio::test]
    async fn test_restart_restores_snapshot() {
        let dir = TempDir::new().unwrap();

        let db = Database::open(test_config(&dir)).await.unwrap();
        db.store().set("kept", "value with\ttab", 3600).unwrap();
        db.store().set("gone", "x", 3600).unwrap();
        db.store().delete("gone");
        db.shutdown().await;

        let db = Database::open(test_config(&dir)).await.unwrap();
        assert_eq!(db.store().get("kept"), Some("value with\ttab".to_string()));
        assert_eq!(db.store().get("gone"), None);
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_records_expired_while_down_are_not_served() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());

        let db = Database::open_with_clock(test_config(&dir), clock.clone())
            .await
            .unwrap();
        db.store().set("short", "x", 10).unwrap();
        db.store().set("long", "y", 1000).unwrap();
        db.shutdown().await;

        clock.advance_secs(60);

        let db = Database::open_with_clock(test_config(&dir), clock.clone())
            .await
            .unwrap();
        assert_eq!(db.store().get("short"), None);
        assert_eq!(db.store().get("long"), Some("y".to_string()));
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_sweep_runs() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let config = test_config(&dir).with_sweep_interval(Duration::from_millis(20));

        let db = Database::open_with_clock(config, clock.clone()).await.unwrap();
        db.store().set("k", "v", 10).unwrap();
        clock.advance_secs(11);

        wait_for(|| db.store().len() == 0).await;
        db.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_fails_open() {
        let dir = TempDir::new().unwrap();
        // A directory where the snapshot file should be
        let config = DatabaseConfig::default().with_snapshot_path(dir.path());

        assert!(Database::open(config).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(test_config(&dir)).await.unwrap();
        assert!(db.store().is_empty());
        db.shutdown().await;

        // The final save creates the file
        assert!(dir.path().join("cache.txt").exists());
    }

    #[tokio::test]
    async fn test_connection_after_idle_shutdown_is_closed() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(test_config(&dir)).await.unwrap());
        let (addr, accept) = serve(Arc::clone(&db)).await;

        // No session is live when the shutdown signal goes out
        db.shutdown().await;

        let mut client = Client::connect(addr).await;
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), client.reader.read_line(&mut line))
            .await
            .expect("late session ignored shutdown")
            .unwrap();
        assert_eq!(n, 0);

        accept.abort();
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(test_config(&dir)).await.unwrap();
        db.shutdown().await;
        db.shutdown().await;
    }
}
