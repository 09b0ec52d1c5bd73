//! Connection state machine for managing TCP connections.
//!
//! Each connection owns its transport, the inbound [`LineBuffer`], the
//! outbound queue and the observer's session attachment.
//!
//! ```text
//! OPEN ──error reply / close request──▶ CLOSING ──output flushed──▶ CLOSED
//!   │                                                                  ▲
//!   └─────────────────────transport error / peer EOF───────────────────┘
//! ```
//!
//! A connection never re-enters `Open` once it has left it.

use crate::runtime::buffer::LineBuffer;
use crate::runtime::observer::{ConnectionObserver, Reply};
use crate::runtime::Limits;
use bytes::{Buf, BytesMut};
use mio::event::Source;
use mio::{Interest, Registry, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Reading and dispatching lines.
    Open,
    /// Reads disabled, flushing the remaining output before closing.
    Closing,
    /// Resources released. Terminal.
    Closed,
}

/// Result of re-evaluating read backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    Unchanged,
    /// Reading was just disabled.
    Paused,
    /// Reading was just re-enabled.
    Resumed,
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection<T, S> {
    stream: T,
    peer: SocketAddr,
    state: ConnState,
    input: LineBuffer,
    output: BytesMut,
    session: S,
    read_enabled: bool,
    /// Interest currently registered with the poller (`None` = deregistered).
    interest: Option<Interest>,
}

impl<T, S> Connection<T, S> {
    /// Create a connection in the `Open` state.
    ///
    /// The caller has already registered `stream` for `registered` interest.
    pub fn new(
        stream: T,
        peer: SocketAddr,
        session: S,
        limits: &Limits,
        registered: Option<Interest>,
    ) -> Self {
        Self {
            stream,
            peer,
            state: ConnState::Open,
            input: LineBuffer::new(limits.max_line, limits.max_buffer),
            output: BytesMut::new(),
            session,
            read_enabled: true,
            interest: registered,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// Whether the reactor should read from this connection.
    pub fn is_reading(&self) -> bool {
        self.state == ConnState::Open && self.read_enabled
    }

    /// Bytes waiting in the output queue.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Bytes buffered but not yet dispatched.
    pub fn buffered_input(&self) -> usize {
        self.input.len()
    }

    /// Room left in the inbound buffer below its high watermark.
    pub fn read_capacity(&self) -> usize {
        self.input.available()
    }

    /// `Closing` with nothing left to flush.
    pub fn is_drained(&self) -> bool {
        self.state == ConnState::Closing && self.output.is_empty()
    }

    /// Move to `Closing`: stop reading, keep flushing output.
    pub fn begin_close(&mut self) {
        if self.state == ConnState::Open {
            self.state = ConnState::Closing;
            self.read_enabled = false;
            self.input.clear();
        }
    }

    /// Dispatch every complete buffered line to `observer`.
    ///
    /// Stops at the first reply that closes the connection. Returns the number
    /// of lines dispatched.
    pub fn process_input<O>(&mut self, observer: &O) -> usize
    where
        O: ConnectionObserver<Session = S>,
    {
        let mut lines = 0;
        while self.state == ConnState::Open {
            match self.input.next_line() {
                Ok(Some(line)) => {
                    lines += 1;
                    let mut reply = Reply::new(&mut self.output);
                    observer.on_line(&mut self.session, &line, &mut reply);
                    if reply.wants_close() {
                        self.begin_close();
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let mut reply = Reply::new(&mut self.output);
                    observer.on_line_too_long(&mut self.session, &mut reply);
                    self.begin_close();
                }
            }
        }
        lines
    }

    /// Pause or resume reading based on buffered input and queued output.
    ///
    /// Reading pauses when the inbound buffer reaches its high watermark or
    /// the output queue reaches `max_output`, and resumes once both are back
    /// under half of their limits.
    pub fn apply_backpressure(&mut self, limits: &Limits) -> Backpressure {
        if self.state != ConnState::Open {
            return Backpressure::Unchanged;
        }

        let over = self.input.is_full() || self.output.len() >= limits.max_output;
        if self.read_enabled && over {
            self.read_enabled = false;
            return Backpressure::Paused;
        }

        let under = self.input.below_low_watermark() && self.output.len() <= limits.max_output / 2;
        if !self.read_enabled && under {
            self.read_enabled = true;
            return Backpressure::Resumed;
        }

        Backpressure::Unchanged
    }

    /// Interest the poller should have for this connection right now.
    pub fn desired_interest(&self) -> Option<Interest> {
        match (self.is_reading(), !self.output.is_empty()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Mark the connection closed and hand back its session.
    pub fn into_session(mut self) -> S {
        self.state = ConnState::Closed;
        self.session
    }
}

impl<T: Read, S> Connection<T, S> {
    /// Read at most `limit` bytes from the transport into the line buffer.
    pub fn read_some(&mut self, limit: usize) -> io::Result<usize> {
        self.input.fill_from(&mut self.stream, limit)
    }
}

impl<T: Write, S> Connection<T, S> {
    /// Write queued output until it is empty or the transport would block.
    ///
    /// Returns the number of bytes written.
    pub fn flush(&mut self) -> io::Result<usize> {
        let mut written = 0;
        while !self.output.is_empty() {
            match self.stream.write(&self.output) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => {
                    self.output.advance(n);
                    written += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

impl<T: Source, S> Connection<T, S> {
    /// Bring the poller registration in line with [`Self::desired_interest`].
    pub fn sync_interest(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        let desired = self.desired_interest();
        match (self.interest, desired) {
            (current, wanted) if current == wanted => return Ok(()),
            (None, Some(interest)) => registry.register(&mut self.stream, token, interest)?,
            (Some(_), Some(interest)) => registry.reregister(&mut self.stream, token, interest)?,
            (Some(_), None) => registry.deregister(&mut self.stream)?,
            (None, None) => {}
        }
        self.interest = desired;
        Ok(())
    }

    /// Remove the transport from the poller if it is registered.
    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        if self.interest.take().is_some() {
            registry.deregister(&mut self.stream)?;
        }
        Ok(())
    }
}

/// Registry of active connections using slab allocation.
///
/// Slab keys double as poller tokens.
pub struct ConnectionRegistry<T, S> {
    connections: Slab<Connection<T, S>>,
    max_connections: usize,
}

impl<T, S> ConnectionRegistry<T, S> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Key the next inserted connection will get.
    pub fn vacant_key(&self) -> usize {
        self.connections.vacant_key()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Insert a new connection into the registry.
    ///
    /// Hands the connection back if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection<T, S>) -> Result<usize, Connection<T, S>> {
        if self.is_full() {
            return Err(conn);
        }
        Ok(self.connections.insert(conn))
    }

    pub fn get(&self, id: usize) -> Option<&Connection<T, S>> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<T, S>> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: usize) -> Option<Connection<T, S>> {
        self.connections.try_remove(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Keys of all live connections.
    pub fn ids(&self) -> Vec<usize> {
        self.connections.iter().map(|(id, _)| id).collect()
    }
}
