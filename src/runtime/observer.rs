//! Connection lifecycle observer.
//!
//! The reactor knows nothing about the protocol spoken on a socket. It
//! reports lifecycle events to a [`ConnectionObserver`], which keeps its own
//! per-connection session state and answers through a [`Reply`].

use bytes::BytesMut;
use std::fmt::{self, Write};
use std::net::SocketAddr;

/// Protocol-side hooks invoked by the reactor.
///
/// All hooks run on the reactor thread and must not block.
pub trait ConnectionObserver {
    /// Per-connection attachment, created on connect and released on close.
    type Session;

    /// A connection was accepted and registered.
    fn on_connect(&self, peer: SocketAddr) -> Self::Session;

    /// A complete line (terminator stripped) was received.
    fn on_line(&self, session: &mut Self::Session, line: &[u8], reply: &mut Reply<'_>);

    /// The peer sent more than the maximum line length without a terminator.
    ///
    /// The connection is closed after this hook whatever the reply says.
    fn on_line_too_long(&self, session: &mut Self::Session, reply: &mut Reply<'_>);

    /// The connection is gone. `error` is set when it ended because of a
    /// transport failure or peer EOF rather than a graceful close.
    fn on_close(&self, session: Self::Session, error: bool);
}

/// Response writer for a single connection.
///
/// Everything written here is queued on the connection's output and flushed
/// asynchronously by the reactor.
pub struct Reply<'a> {
    out: &'a mut BytesMut,
    close: bool,
}

impl<'a> Reply<'a> {
    pub fn new(out: &'a mut BytesMut) -> Self {
        Self { out, close: false }
    }

    /// Queue one line; a `\n` is appended.
    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        // Writing into BytesMut cannot fail
        let _ = self.out.write_fmt(args);
        self.out.extend_from_slice(b"\n");
    }

    /// Queue raw bytes as-is.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// Queue `ERROR: <message>` and request the connection to close once
    /// the output is flushed.
    pub fn error(&mut self, message: impl fmt::Display) {
        self.line(format_args!("ERROR: {message}"));
        self.close = true;
    }

    /// Request the connection to close once the output is flushed.
    pub fn close(&mut self) {
        self.close = true;
    }

    pub fn wants_close(&self) -> bool {
        self.close
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_line() {
        let mut out = BytesMut::new();
        let mut reply = Reply::new(&mut out);
        reply.line(format_args!("SIZE {} {}", 10, 20));
        assert!(!reply.wants_close());
        assert_eq!(&out[..], b"SIZE 10 20\n");
    }

    #[test]
    fn test_reply_error_requests_close() {
        let mut out = BytesMut::new();
        let mut reply = Reply::new(&mut out);
        reply.error("Unknown command");
        assert!(reply.wants_close());
        assert_eq!(&out[..], b"ERROR: Unknown command\n");
    }

    #[test]
    fn test_reply_raw_and_close() {
        let mut out = BytesMut::new();
        let mut reply = Reply::new(&mut out);
        reply.raw(b"abc");
        reply.close();
        assert!(reply.wants_close());
        assert_eq!(&out[..], b"abc");
    }
}
