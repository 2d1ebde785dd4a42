//! Snapshot Persistence
//!
//! The whole store is periodically rewritten to a single text file and read
//! back once at startup. Persistence is best-effort: the store keeps serving
//! from memory whatever happens to the file.
//!
//! ## File Format
//!
//! One record per line, three TAB-separated fields:
//!
//! ```text
//! <key> \t <value> \t <expires_at as RFC 3339> \n
//! ```
//!
//! Keys and values are escaped so that the delimiter and line terminator can
//! never appear raw inside a field:
//!
//! | Byte            | Written as |
//! |-----------------|------------|
//! | backslash       | `\\`       |
//! | TAB             | `\t`       |
//! | LF              | `\n`       |
//! | CR              | `\r`       |
//!
//! ## Writes
//!
//! Saves go to `<path>.tmp` first and are renamed over `<path>`, so a crash
//! mid-write leaves the previous snapshot intact.

use crate::storage::engine::Record;
use crate::storage::Store;
use chrono::{DateTime, SecondsFormat, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Field separator within a snapshot line.
const DELIMITER: char = '\t';

/// Default interval between snapshot saves.
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised while reading or writing snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    /// A line that cannot be decoded into a record
    #[error("malformed snapshot line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Escapes a key or value for the snapshot file.
pub fn escape_field(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape_field`]. Returns `None` on an unknown or dangling escape.
pub fn unescape_field(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            't' => out.push('\t'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            _ => return None,
        }
    }
    Some(out)
}

/// Encodes one record as a snapshot line, including the trailing newline.
pub fn encode_line(key: &str, record: &Record) -> String {
    format!(
        "{}{d}{}{d}{}\n",
        escape_field(key),
        escape_field(&record.value),
        record.expires_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        d = DELIMITER,
    )
}

/// Decodes one snapshot line (without its newline).
///
/// `line_no` is only used for error reporting.
pub fn decode_line(line: &str, line_no: usize) -> Result<(String, Record), SnapshotError> {
    let malformed = |reason: &str| SnapshotError::Malformed {
        line: line_no,
        reason: reason.to_string(),
    };

    // Escaping guarantees raw TABs only ever appear as delimiters.
    let fields: Vec<&str> = line.split(DELIMITER).collect();
    if fields.len() != 3 {
        return Err(malformed(&format!("expected 3 fields, found {}", fields.len())));
    }

    let key = unescape_field(fields[0]).ok_or_else(|| malformed("bad escape in key"))?;
    let value = unescape_field(fields[1]).ok_or_else(|| malformed("bad escape in value"))?;
    let expires_at = DateTime::parse_from_rfc3339(fields[2])
        .map_err(|e| malformed(&format!("bad timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok((key, Record::new(value, expires_at)))
}

/// Outcome of loading a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records inserted into the store
    pub loaded: usize,
    /// Lines skipped as malformed
    pub skipped: usize,
}

/// Hydrates `store` from the snapshot at `path`.
///
/// A missing file is a cold start and yields an empty report. Malformed lines,
/// including lines that are not valid UTF-8, are logged and skipped. Expiry is
/// not re-checked: records that lapsed while the server was down are dropped
/// by the next read or sweep.
pub async fn load(path: &Path, store: &Store) -> Result<LoadReport, SnapshotError> {
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(LoadReport::default());
        }
        Err(e) => return Err(e.into()),
    };

    let mut report = LoadReport::default();
    for (idx, raw) in contents.split(|&b| b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        let decoded = std::str::from_utf8(raw)
            .map_err(|e| SnapshotError::Malformed {
                line: idx + 1,
                reason: format!("invalid UTF-8: {}", e),
            })
            .and_then(|line| decode_line(line, idx + 1));
        match decoded {
            Ok((key, record)) => {
                store.insert_record(key, record);
                report.loaded += 1;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping snapshot line");
                report.skipped += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        loaded = report.loaded,
        skipped = report.skipped,
        "Snapshot loaded"
    );
    Ok(report)
}

/// Writes the entire store to `path`, replacing any previous snapshot.
///
/// Returns the number of records written.
pub async fn save(path: &Path, store: &Store) -> Result<usize, SnapshotError> {
    let records = store.records();
    let count = records.len();

    let mut contents = String::new();
    for (key, record) in &records {
        contents.push_str(&encode_line(key, record));
    }

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, contents.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;

    debug!(path = %path.display(), records = count, "Snapshot written");
    Ok(count)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Configuration for the snapshot persister.
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Snapshot file location
    pub path: PathBuf,
    /// Interval between saves (default: 1 minute)
    pub interval: Duration,
}

impl PersistConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_PERSIST_INTERVAL,
        }
    }
}

/// A handle to the running snapshot persister.
#[derive(Debug)]
pub struct SnapshotPersister {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SnapshotPersister {
    /// Starts periodic snapshotting as a background task.
    ///
    /// Failed saves are logged and retried on the next tick; they never reach
    /// clients.
    pub fn start(store: Arc<Store>, config: PersistConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            path = %config.path.display(),
            interval_secs = config.interval.as_secs(),
            "Snapshot persister started"
        );
        let task = tokio::spawn(persist_loop(store, config, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Stops the persister, waiting for its final save to complete.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Snapshot persister stopped");
    }
}

impl Drop for SnapshotPersister {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn persist_loop(
    store: Arc<Store>,
    config: PersistConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                persist_once(&config.path, &store).await;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot persister received shutdown signal");
                    break;
                }
            }
        }
    }

    // Final save so writes since the last tick survive a clean shutdown.
    persist_once(&config.path, &store).await;
}

async fn persist_once(path: &Path, store: &Store) {
    if let Err(e) = save(path, store).await {
        error!(path = %path.display(), error = %e, "Snapshot save failed, will retry");
    }
}
