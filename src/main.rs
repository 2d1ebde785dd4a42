//! TideKV - An In-Memory Key-Value Store with Expiry and Pub/Sub
//!
//! This is the main entry point for the TideKV server.
//! It opens the database, binds the TCP listener and hands every accepted
//! connection to the database until Ctrl+C.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tidekv::{Database, DatabaseConfig};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// TideKV server
#[derive(Parser, Debug)]
#[command(name = "tidekv")]
#[command(about = "In-memory key-value store with per-key expiry, snapshots and pub/sub")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(long, env = "TIDEKV_HOST", default_value = tidekv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "TIDEKV_PORT", default_value_t = tidekv::DEFAULT_PORT)]
    port: u16,

    /// Snapshot file, loaded at startup and rewritten periodically
    #[arg(short, long, env = "TIDEKV_SNAPSHOT", default_value = tidekv::config::DEFAULT_SNAPSHOT_PATH)]
    snapshot: PathBuf,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 300)]
    sweep_interval: u64,

    /// Seconds between snapshot saves
    #[arg(long, default_value_t = 60)]
    persist_interval: u64,

    /// Pending pushed messages per subscriber before new ones are dropped
    #[arg(long, default_value_t = 1024)]
    mailbox_capacity: usize,

    /// Log filter (e.g. "debug" or "tidekv=trace"); overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::default()
            .with_snapshot_path(&self.snapshot)
            .with_sweep_interval(Duration::from_secs(self.sweep_interval.max(1)))
            .with_persist_interval(Duration::from_secs(self.persist_interval.max(1)))
            .with_mailbox_capacity(self.mailbox_capacity)
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn print_banner(args: &Args) {
    println!(
        r#"
TideKV v{} - In-Memory Key-Value Store
──────────────────────────────────────────────────────────────
Server started on {}
Snapshot file: {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        tidekv::VERSION,
        args.bind_address(),
        args.snapshot.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let db = Database::open(args.database_config()).await?;

    // Bind the TCP listener
    let listener = TcpListener::bind(args.bind_address()).await?;
    info!(address = %args.bind_address(), "Listening");
    print_banner(&args);

    // Main accept loop
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => db.handle_connection(stream, addr),
                Err(e) => error!(error = %e, "Failed to accept connection"),
            },
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown signal received, stopping server...");
                break;
            }
        }
    }

    drop(listener);
    db.shutdown().await;

    let stats = db.stats();
    info!(
        keys = stats.storage.keys,
        connections = stats.connections_accepted,
        commands = stats.commands_processed,
        messages = stats.pubsub.messages_published,
        "Server shutdown complete"
    );
    Ok(())
}
