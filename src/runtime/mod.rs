//! Custom runtime for line-oriented TCP services.
//!
//! A single-threaded mio reactor (epoll on Linux, kqueue on macOS) owns the
//! listening socket and every connection. Protocol code plugs in through a
//! [`ConnectionObserver`].
//!
//! Shared pieces:
//! - `LineBuffer`: inbound byte accumulation and line splitting
//! - `Connection`: per-connection state machine and backpressure
//! - `EventLoop`: acceptor, readiness dispatch, fairness backlog

mod buffer;
mod connection;
mod event_loop;
mod observer;

pub use buffer::{LineBuffer, LineTooLong};
pub use connection::{Backpressure, ConnState, Connection, ConnectionRegistry};
pub use event_loop::{bind_listener, EventLoop, ShutdownHandle};
pub use observer::{ConnectionObserver, Reply};

/// Per-connection and per-server resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Longest accepted line, terminator excluded.
    pub max_line: usize,
    /// Inbound buffer high watermark; also the per-round read budget.
    pub max_buffer: usize,
    /// Queued output at which reading pauses.
    pub max_output: usize,
    pub max_connections: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_line: 1024,
            max_buffer: 10 * 1024,
            max_output: 64 * 1024,
            max_connections: 10_000,
        }
    }
}
