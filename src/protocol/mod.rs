//! Line Protocol Implementation
//!
//! TideKV's wire protocol is plain text: one command per `\n`-terminated line,
//! one response line back.
//!
//! ## Modules
//!
//! - `types`: Defines the `Command` and `Response` enums and serialization
//! - `parser`: Line framing and command decoding
//!
//! ## Example
//!
//! ```
//! use tidekv::protocol::{next_line, parse_command, Command, Response};
//!
//! let buf = b"GET name\r\nSET";
//! let (len, consumed) = next_line(buf).unwrap();
//! assert_eq!(consumed, 10);
//!
//! let cmd = parse_command(&buf[..len]).unwrap();
//! assert_eq!(cmd, Command::Get { key: "name".into() });
//!
//! assert_eq!(&Response::Null.serialize()[..], b"NULL\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{next_line, parse_command, ParseError, ParseResult};
pub use types::{message_line, Command, Response};
