//! Line Protocol Parser
//!
//! Commands arrive as text lines on a byte stream. Parsing happens in two
//! steps:
//!
//! 1. **Framing**: [`next_line`] looks for the next `\n` in the connection's
//!    buffer and tells the caller how many bytes make up the line.
//! 2. **Decoding**: [`parse_command`] turns one line into a typed [`Command`].
//!
//! Decoding rules:
//! - the line is trimmed and split on whitespace into fields
//! - fewer than two fields is always an error, whatever the command
//! - fields beyond a command's arguments are ignored (`SET k v 60 x` sets
//!   `k` for 60 seconds)
//! - the command name is case-insensitive
//! - `SEND` takes the rest of the line (fields joined by single spaces) as
//!   the message
//!
//! Every [`ParseError`] is reported to the client as `Invalid command`; none of
//! them close the connection.

use crate::protocol::types::Command;
use thiserror::Error;

/// Errors that can occur while decoding a command line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is not valid UTF-8
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Fewer than two whitespace-separated fields
    #[error("expected at least 2 fields, found {0}")]
    TooFewFields(usize),

    /// Known command with too few fields for its arguments
    #[error("too few fields for '{command}': {found}")]
    WrongArity { command: &'static str, found: usize },

    /// Command name not recognized
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Locates the first complete line in `buf`.
///
/// Returns `(line_len, consumed)`: the line's length without its terminator
/// (a trailing `\r` is also excluded) and the number of bytes to advance past
/// it. Returns `None` if no `\n` has arrived yet.
pub fn next_line(buf: &[u8]) -> Option<(usize, usize)> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let line_len = if pos > 0 && buf[pos - 1] == b'\r' {
        pos - 1
    } else {
        pos
    };
    Some((line_len, pos + 1))
}

/// Decodes one command line (terminator already stripped).
///
/// # Example
///
/// ```
/// use tidekv::protocol::{parse_command, Command};
///
/// let cmd = parse_command(b"set name Ariz 60").unwrap();
/// assert_eq!(
///     cmd,
///     Command::Set {
///         key: "name".into(),
///         value: "Ariz".into(),
///         ttl: Some("60".into()),
///     }
/// );
/// ```
pub fn parse_command(line: &[u8]) -> ParseResult<Command> {
    let text = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    let fields: Vec<&str> = text.split_whitespace().collect();

    if fields.len() < 2 {
        return Err(ParseError::TooFewFields(fields.len()));
    }

    let name = fields[0].to_uppercase();
    let found = fields.len();

    match name.as_str() {
        "GET" => Ok(Command::Get {
            key: fields[1].to_string(),
        }),
        "SET" => {
            expect_min_fields("SET", found, 3)?;
            Ok(Command::Set {
                key: fields[1].to_string(),
                value: fields[2].to_string(),
                ttl: fields.get(3).map(|s| s.to_string()),
            })
        }
        "DELETE" => Ok(Command::Delete {
            key: fields[1].to_string(),
        }),
        "SUBSCRIBE" => Ok(Command::Subscribe {
            topic: fields[1].to_string(),
        }),
        "UNSUBSCRIBE" => Ok(Command::Unsubscribe {
            topic: fields[1].to_string(),
        }),
        "SEND" => {
            expect_min_fields("SEND", found, 3)?;
            Ok(Command::Send {
                topic: fields[1].to_string(),
                message: fields[2..].join(" "),
            })
        }
        _ => Err(ParseError::UnknownCommand(name)),
    }
}

fn expect_min_fields(command: &'static str, found: usize, min: usize) -> ParseResult<()> {
    if found >= min {
        Ok(())
    } else {
        Err(ParseError::WrongArity { command, found })
    }
}
