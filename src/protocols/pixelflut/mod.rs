//! Pixelflut protocol implementation.
//!
//! A line-oriented ASCII protocol for drawing on a shared canvas. Lines are
//! terminated by `\n` only; a `\r` is ordinary content.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  PX 5 5\n
//! Response: PX 5 5 FF0000\n
//!
//! Request:  PX 5 5 FF0000\n       (also WW grayscale or RRGGBBAA)
//! Response: none
//!
//! Request:  SIZE\n
//! Response: SIZE 1024 1024\n
//!
//! Request:  STATS\n
//! Response: STATS px:42 conn:3\n
//! ```
//!
//! Any rejected line is answered with `ERROR: <message>\n`, after which
//! the server closes the connection.

pub mod handler;
pub mod parser;

pub use handler::{ClientSession, PixelflutHandler, HELP_TEXT};
pub use parser::{parse_line, Command, ParseError};
