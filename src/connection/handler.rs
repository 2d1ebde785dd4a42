//! Connection Handler Module
//!
//! This module handles individual client connections to TideKV.
//! Each client gets a session made of two concurrent loops sharing one
//! outbound writer:
//!
//! - the **command loop** reads lines, executes them and writes responses
//! - the **drain task** receives published messages from the session's
//!   mailbox and writes them as they arrive
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. Session created, drain task spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐      ┌─────────────────────┐
//!    │      Command Loop            │      │     Drain Task      │
//!    │                              │      │                     │
//!    │  Read line from socket       │      │  mailbox.recv()     │
//!    │  Parse + execute command     │      │        │            │
//!    │  lock(writer) + respond ─────┼──┐┌──┼─ lock(writer)+write │
//!    │         [Loop back]          │  ││  │    [Loop back]      │
//!    └──────────────────────────────┘  ▼▼  └─────────────────────┘
//!                               ┌──────────────┐
//!                               │ Mutex<Writer>│
//!                               └──────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error / server shutdown
//!        │
//!        ▼
//! 5. Deregister from all topics, abort + join drain task
//! ```
//!
//! ## Write Exclusion
//!
//! Every line (response or pushed message) is written *and flushed* while
//! holding the writer mutex, so output from the two loops is interleaved at
//! line granularity only, never inside a line.
//!
//! ## Buffer Management
//!
//! We use a BytesMut buffer to accumulate incoming data. TCP is a stream
//! protocol - we might receive partial lines, or several lines in a single read.

use crate::commands::CommandHandler;
use crate::protocol::{message_line, next_line, Response};
use crate::pubsub::{Mailbox, SessionId, TopicRegistry};
use crate::storage::Store;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total published messages written to subscribers
    pub messages_pushed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_pushed(&self) {
        self.messages_pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Everything a session needs from the server.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub store: Arc<Store>,
    pub topics: Arc<TopicRegistry>,
    pub stats: Arc<ConnectionStats>,
    /// Flips to `true` when the server shuts down
    pub shutdown: watch::Receiver<bool>,
    pub mailbox_capacity: usize,
}

/// The outbound half of a connection, shared by both session loops.
type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Handles a single client connection.
///
/// Generic over the read and write halves so sessions can run on anything
/// stream-like, not only TCP sockets.
pub struct ConnectionHandler<R, W> {
    reader: R,

    /// Outbound half, shared with the drain task
    writer: SharedWriter<W>,

    /// Client's address (for logging)
    peer: String,

    /// Buffer for incoming data
    buffer: BytesMut,

    command_handler: CommandHandler,

    /// Receiving side of this session's mailbox; moved into the drain task
    mailbox_rx: Option<mpsc::Receiver<String>>,

    ctx: SessionContext,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a new session over `reader`/`writer`.
    pub fn new(reader: R, writer: W, peer: impl Into<String>, ctx: SessionContext) -> Self {
        ctx.stats.connection_opened();

        let (mailbox, mailbox_rx) = Mailbox::channel(ctx.session_id, ctx.mailbox_capacity);
        let command_handler =
            CommandHandler::new(Arc::clone(&ctx.store), Arc::clone(&ctx.topics), mailbox);

        Self {
            reader,
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            peer: peer.into(),
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            mailbox_rx: Some(mailbox_rx),
            ctx,
        }
    }

    /// Runs the session until the client disconnects, an I/O error occurs,
    /// or the server shuts down.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let session = self.ctx.session_id;
        info!(client = %self.peer, session = session, "Client connected");

        let drain = self.spawn_drain();
        let result = self.main_loop().await;

        // Teardown: no registration or drain task outlives the session.
        self.ctx.topics.unsubscribe_all(session);
        if let Some(drain) = drain {
            drain.abort();
            let _ = drain.await;
        }

        match &result {
            Ok(()) => info!(client = %self.peer, session = session, "Session closed"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    info!(client = %self.peer, session = session, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.peer, session = session, "Connection reset by client")
                }
                _ => warn!(client = %self.peer, session = session, error = %e, "Connection error"),
            },
        }

        self.ctx.stats.connection_closed();
        result
    }

    fn spawn_drain(&mut self) -> Option<JoinHandle<()>> {
        let rx = self.mailbox_rx.take()?;
        Some(tokio::spawn(drain_mailbox(
            rx,
            Arc::clone(&self.writer),
            Arc::clone(&self.ctx.stats),
            self.peer.clone(),
        )))
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            // Execute every complete line already buffered, in arrival order
            while let Some((len, consumed)) = next_line(&self.buffer) {
                let line = self.buffer.split_to(consumed);
                self.execute_and_respond(&line[..len]).await?;
            }

            match self.read_more_data().await? {
                ReadOutcome::Data => {}
                ReadOutcome::Shutdown => return Ok(()),
                ReadOutcome::Eof => {
                    if !self.buffer.is_empty() {
                        // Final line without a terminator
                        let line = self.buffer.split();
                        let len = if line.ends_with(b"\r") {
                            line.len() - 1
                        } else {
                            line.len()
                        };
                        self.execute_and_respond(&line[..len]).await?;
                    }
                    return Err(ConnectionError::ClientDisconnected);
                }
            }
        }
    }

    async fn execute_and_respond(&mut self, line: &[u8]) -> Result<(), ConnectionError> {
        let response = self.command_handler.execute_line(line);
        self.ctx.stats.command_processed();
        self.send_response(&response).await
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<ReadOutcome, ConnectionError> {
        // Check buffer size limit
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.peer,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if *self.ctx.shutdown.borrow() {
            return Ok(ReadOutcome::Shutdown);
        }

        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = tokio::select! {
            read = self.reader.read_buf(&mut self.buffer) => read?,
            _ = self.ctx.shutdown.changed() => {
                debug!(client = %self.peer, "Server shutting down, closing session");
                return Ok(ReadOutcome::Shutdown);
            }
        };

        if n == 0 {
            return Ok(ReadOutcome::Eof);
        }

        self.ctx.stats.bytes_read(n);
        trace!(client = %self.peer, bytes = n, "Read data");

        Ok(ReadOutcome::Data)
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &Response) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        write_line(&self.writer, &bytes).await?;
        self.ctx.stats.bytes_written(bytes.len());
        trace!(
            client = %self.peer,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

enum ReadOutcome {
    Data,
    Eof,
    Shutdown,
}

/// Writes one full line and flushes it while holding the writer lock.
async fn write_line<W>(writer: &Mutex<BufWriter<W>>, line: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer.lock().await;
    writer.write_all(line).await?;
    writer.flush().await
}

/// Pushes every message arriving in the mailbox to the client.
///
/// Ends when the mailbox closes or a write fails; in the latter case the
/// dropped receiver lets the registry prune this session lazily.
async fn drain_mailbox<W>(
    mut rx: mpsc::Receiver<String>,
    writer: SharedWriter<W>,
    stats: Arc<ConnectionStats>,
    peer: String,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = message_line(&message);
        if let Err(e) = write_line(&writer, &line).await {
            debug!(client = %peer, error = %e, "Failed to push message, stopping delivery");
            return;
        }
        stats.message_pushed();
        stats.bytes_written(line.len());
        trace!(client = %peer, bytes = line.len(), "Pushed message");
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client TCP connection.
///
/// This is a convenience function that splits the stream, creates a
/// ConnectionHandler and runs it to completion.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: SessionContext) {
    let peer = addr.to_string();
    let (reader, writer) = stream.into_split();

    let handler = ConnectionHandler::new(reader, writer, peer.clone(), ctx);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %peer, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    struct Harness {
        store: Arc<Store>,
        topics: Arc<TopicRegistry>,
        stats: Arc<ConnectionStats>,
        shutdown_tx: watch::Sender<bool>,
        shutdown_rx: watch::Receiver<bool>,
    }

    impl Harness {
        fn new() -> Self {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            Self {
                store: Arc::new(Store::new()),
                topics: Arc::new(TopicRegistry::new()),
                stats: Arc::new(ConnectionStats::new()),
                shutdown_tx,
                shutdown_rx,
            }
        }

        /// Starts a session on an in-memory pipe and returns the client end.
        fn connect(
            &self,
            session_id: SessionId,
        ) -> (DuplexStream, JoinHandle<Result<(), ConnectionError>>) {
            let (client, server) = duplex(64 * 1024);
            let (reader, writer) = tokio::io::split(server);
            let handler = ConnectionHandler::new(
                reader,
                writer,
                format!("test-{}", session_id),
                self.context(session_id),
            );
            (client, tokio::spawn(handler.run()))
        }

        fn context(&self, session_id: SessionId) -> SessionContext {
            SessionContext {
                session_id,
                store: Arc::clone(&self.store),
                topics: Arc::clone(&self.topics),
                stats: Arc::clone(&self.stats),
                shutdown: self.shutdown_rx.clone(),
                mailbox_capacity: 1024,
            }
        }
    }

    async fn read_line<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> String {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_set_get_over_pipe() {
        let harness = Harness::new();
        let (client, _session) = harness.connect(1);
        let (rd, mut wr) = tokio::io::split(client);
        let mut rd = BufReader::new(rd);

        wr.write_all(b"SET name Ariz 60\n").await.unwrap();
        assert_eq!(read_line(&mut rd).await, "Ariz\n");

        wr.write_all(b"get name\r\n").await.unwrap();
        assert_eq!(read_line(&mut rd).await, "Ariz\n");

        wr.write_all(b"GET missing\n").await.unwrap();
        assert_eq!(read_line(&mut rd).await, "NULL\n");
    }

    #[tokio::test]
    async fn test_exact_bytes_on_the_wire() {
        let harness = Harness::new();
        let reader = tokio_test::io::Builder::new()
            .read(b"SET k v 60\n")
            .read(b"GET k\r\nDELETE k\nGET")
            .read(b" k\n")
            .build();
        let writer = tokio_test::io::Builder::new()
            .write(b"v\n")
            .write(b"v\n")
            .write(b"Record removed\n")
            .write(b"NULL\n")
            .build();

        let handler = ConnectionHandler::new(reader, writer, "mock", harness.context(1));
        let result = handler.run().await;

        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(harness.stats.commands_processed.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_pipelined_lines_answered_in_order() {
        let harness = Harness::new();
        let (client, _session) = harness.connect(1);
        let (rd, mut wr) = tokio::io::split(client);
        let mut rd = BufReader::new(rd);

        wr.write_all(b"SET k1 v1 60\nSET k2 v2 60\nGET k1\nDELETE k2\nGET k2\n")
            .await
            .unwrap();

        for expected in ["v1\n", "v2\n", "v1\n", "Record removed\n", "NULL\n"] {
            assert_eq!(read_line(&mut rd).await, expected);
        }
    }

    #[tokio::test]
    async fn test_malformed_commands_keep_connection_open() {
        let harness = Harness::new();
        let (client, _session) = harness.connect(1);
        let (rd, mut wr) = tokio::io::split(client);
        let mut rd = BufReader::new(rd);

        wr.write_all(b"\nBOGUS\nSET k v abc\nSET k v 60\n").await.unwrap();

        assert_eq!(read_line(&mut rd).await, "Invalid command\n");
        assert_eq!(read_line(&mut rd).await, "Invalid command\n");
        assert_eq!(read_line(&mut rd).await, "Invalid TTL\n");
        assert_eq!(read_line(&mut rd).await, "v\n");
    }

    #[tokio::test]
    async fn test_trailing_line_executed_at_eof() {
        let harness = Harness::new();
        let (client, session) = harness.connect(1);
        let (rd, mut wr) = tokio::io::split(client);
        let mut rd = BufReader::new(rd);

        wr.write_all(b"SET k v 60").await.unwrap();
        wr.shutdown().await.unwrap();

        assert_eq!(read_line(&mut rd).await, "v\n");
        let result = session.await.unwrap();
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
        assert_eq!(harness.store.get("k"), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        let harness = Harness::new();
        let (client, session) = harness.connect(1);
        let (_rd, mut wr) = tokio::io::split(client);

        let junk = vec![b'x'; MAX_BUFFER_SIZE + 10];
        let _ = wr.write_all(&junk).await;

        let result = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ConnectionError::BufferFull)));
    }

    #[tokio::test]
    async fn test_published_messages_are_pushed() {
        let harness = Harness::new();
        let (sub, _s1) = harness.connect(1);
        let (publ, _s2) = harness.connect(2);
        let (sub_rd, mut sub_wr) = tokio::io::split(sub);
        let (pub_rd, mut pub_wr) = tokio::io::split(publ);
        let mut sub_rd = BufReader::new(sub_rd);
        let mut pub_rd = BufReader::new(pub_rd);

        sub_wr.write_all(b"SUBSCRIBE news\n").await.unwrap();
        assert_eq!(read_line(&mut sub_rd).await, "Subscribed to channel news\n");

        pub_wr.write_all(b"SEND news hello world\n").await.unwrap();
        assert_eq!(read_line(&mut pub_rd).await, "Published to the channel: news\n");

        assert_eq!(read_line(&mut sub_rd).await, "hello world\n");
        assert_eq!(harness.stats.messages_pushed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_teardown_deregisters_session() {
        let harness = Harness::new();
        let (client, session) = harness.connect(7);
        let (rd, mut wr) = tokio::io::split(client);
        let mut rd = BufReader::new(rd);

        wr.write_all(b"SUBSCRIBE a\nSUBSCRIBE b\n").await.unwrap();
        read_line(&mut rd).await;
        read_line(&mut rd).await;
        assert_eq!(harness.topics.topic_count(), 2);

        drop(wr);
        drop(rd);
        let _ = session.await.unwrap();

        assert_eq!(harness.topics.topic_count(), 0);
        assert_eq!(harness.stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_ends_session() {
        let harness = Harness::new();
        let (_client, session) = harness.connect(1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        harness.shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session ignored shutdown")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_responses_and_pushes_never_interleave() {
        let harness = Harness::new();
        let (sub, _s1) = harness.connect(1);
        let (publ, _s2) = harness.connect(2);
        let (sub_rd, mut sub_wr) = tokio::io::split(sub);
        let (pub_rd, mut pub_wr) = tokio::io::split(publ);
        let mut sub_rd = BufReader::new(sub_rd);

        let value = "v".repeat(2000);
        let message = "m".repeat(2000);
        harness.store.set("big", value.clone(), 3600).unwrap();

        sub_wr.write_all(b"SUBSCRIBE t\n").await.unwrap();
        assert_eq!(read_line(&mut sub_rd).await, "Subscribed to channel t\n");

        const ROUNDS: usize = 200;

        // Drain the publisher's acknowledgements so its session never stalls
        let pub_acks = tokio::spawn(async move {
            let mut rd = BufReader::new(pub_rd);
            for _ in 0..ROUNDS {
                read_line(&mut rd).await;
            }
        });

        let send_line = format!("SEND t {}\n", message);
        let publisher = tokio::spawn(async move {
            for _ in 0..ROUNDS {
                pub_wr.write_all(send_line.as_bytes()).await.unwrap();
            }
            pub_wr
        });
        let getter = tokio::spawn(async move {
            for _ in 0..ROUNDS {
                sub_wr.write_all(b"GET big\n").await.unwrap();
            }
            sub_wr
        });

        let (mut values, mut messages) = (0, 0);
        for _ in 0..ROUNDS * 2 {
            let line = read_line(&mut sub_rd).await;
            let line = line.trim_end_matches('\n');
            if line == value {
                values += 1;
            } else if line == message {
                messages += 1;
            } else {
                panic!("corrupted line of length {}", line.len());
            }
        }

        assert_eq!(values, ROUNDS);
        assert_eq!(messages, ROUNDS);
        let _keep_open = (publisher.await.unwrap(), getter.await.unwrap());
        pub_acks.await.unwrap();
    }
}
