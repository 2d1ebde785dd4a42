//! Connection Handler Module
//!
//! This module manages individual client sessions. Each accepted connection
//! runs in its own async task, plus one drain task that pushes published
//! messages to the client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (main.rs)                                │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │  Database::handle_     │
//!           │     connection()       │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │ Read bytes  │───>│ Frame line  │───>│ Execute cmd │     │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘     │
//! │                                               ▼             │
//! │  ┌─────────────┐                      ┌─────────────┐       │
//! │  │ Drain task  │────── writer ───────>│ Send resp   │       │
//! │  └─────────────┘       mutex          └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Pipelining**: several lines in one packet are answered in order
//! - **Push delivery**: published messages reach the client while it is idle
//! - **Clean teardown**: topic registrations and the drain task never outlive
//!   the session
//! - **Statistics**: tracks connection, command and push metrics

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, ConnectionError, ConnectionHandler, ConnectionStats, SessionContext,
};
