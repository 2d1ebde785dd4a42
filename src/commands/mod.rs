//! Command Handler Module
//!
//! This module implements the command processing layer for TideKV.
//! It receives command lines, executes them against the record store or the
//! topic registry, and returns the response line.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Line Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! └───┬─────────┬───┘
//!     │         │
//!     ▼         ▼
//! ┌───────┐ ┌───────────────┐
//! │ Store │ │ TopicRegistry │
//! └───────┘ └───────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `GET`, `SET`, `DELETE`
//! - `SUBSCRIBE`, `UNSUBSCRIBE`, `SEND`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
