//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! ## Fairness
//!
//! mio is edge-triggered, so a connection must be read until `WouldBlock`
//! or it will not be reported again. To keep one fast client from starving
//! the rest, each connection may read at most `max_buffer` bytes per loop
//! round. A connection that used up its budget goes into the backlog and is
//! serviced again in the next round, after the poller has been checked for
//! everyone else (zero poll timeout while the backlog is non-empty).

use crate::runtime::connection::{Backpressure, Connection, ConnectionRegistry};
use crate::runtime::observer::ConnectionObserver;
use crate::runtime::Limits;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// How long to wait before retrying a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Readiness of one token, copied out of the event list.
#[derive(Debug, Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
}

/// Stops a running [`EventLoop`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the loop to stop. It closes every connection and returns from
    /// [`EventLoop::run`].
    pub fn shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.waker.wake() {
                warn!(error = %e, "Failed to wake reactor for shutdown");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Single-threaded reactor driving the acceptor and every connection.
pub struct EventLoop<O: ConnectionObserver> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    connections: ConnectionRegistry<TcpStream, O::Session>,
    observer: O,
    limits: Limits,
    /// Connections with unread input left over from the previous round.
    backlog: VecDeque<usize>,
    accept_retry: bool,
    shutdown: ShutdownHandle,
}

impl<O: ConnectionObserver> EventLoop<O> {
    /// Wrap a bound, non-blocking listener and register it for accepts.
    pub fn new(
        listener: std::net::TcpListener,
        observer: O,
        limits: Limits,
        event_capacity: usize,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shutdown = ShutdownHandle {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        };

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            listener,
            connections: ConnectionRegistry::new(limits.max_connections),
            observer,
            limits,
            backlog: VecDeque::new(),
            accept_retry: false,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested.
    ///
    /// Only a failure of the poller itself is returned as an error; socket
    /// errors stay contained to their connection.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = ?self.listener.local_addr().ok(),
            max_connections = self.limits.max_connections,
            max_line = self.limits.max_line,
            max_buffer = self.limits.max_buffer,
            "Reactor started"
        );

        let mut ready: Vec<Readiness> = Vec::with_capacity(self.events.capacity());

        while !self.shutdown.is_shutdown() {
            let timeout = if !self.backlog.is_empty() {
                Some(Duration::ZERO)
            } else if self.accept_retry {
                Some(ACCEPT_RETRY_DELAY)
            } else {
                None
            };

            if let Err(e) = self.poll.poll(&mut self.events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            ready.clear();
            ready.extend(self.events.iter().map(|event| Readiness {
                token: event.token(),
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            }));

            if self.accept_retry {
                self.accept_connections();
            }

            let carried = std::mem::take(&mut self.backlog);

            for r in &ready {
                match r.token {
                    LISTENER_TOKEN => self.accept_connections(),
                    WAKER_TOKEN => {}
                    Token(conn_id) => self.service(conn_id, r.readable, r.writable),
                }
            }

            for conn_id in carried {
                self.service(conn_id, true, false);
            }
        }

        self.close_all();
        Ok(())
    }

    fn accept_connections(&mut self) {
        self.accept_retry = false;

        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connections.is_full() {
                        warn!(
                            peer = %peer,
                            max_connections = self.limits.max_connections,
                            "Connection limit reached, closing socket"
                        );
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let conn_id = self.connections.vacant_key();
                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(conn_id), Interest::READABLE)
                    {
                        warn!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    let session = self.observer.on_connect(peer);
                    let conn = Connection::new(
                        stream,
                        peer,
                        session,
                        &self.limits,
                        Some(Interest::READABLE),
                    );

                    match self.connections.insert(conn) {
                        Ok(id) => debug!(conn_id = id, peer = %peer, "Accepted connection"),
                        Err(mut conn) => {
                            let _ = conn.deregister(self.poll.registry());
                            self.observer.on_close(conn.into_session(), true);
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if is_descriptor_exhaustion(&e) {
                        warn!(error = %e, "Out of file descriptors, deferring accept");
                    } else {
                        error!(error = %e, "Accept failed");
                    }
                    self.accept_retry = true;
                    break;
                }
            }
        }
    }

    /// Handle readiness for one connection, closing it on transport errors.
    fn service(&mut self, conn_id: usize, readable: bool, writable: bool) {
        if let Err(e) = self.drive(conn_id, readable, writable) {
            debug!(conn_id, error = %e, "Connection error");
            self.close_connection(conn_id, true);
        }
    }

    fn drive(&mut self, conn_id: usize, readable: bool, writable: bool) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };

        // Flush first so a drained queue can lift output backpressure
        if writable {
            conn.flush()?;
        }

        if readable {
            self.read_connection(conn_id)?;
        }

        self.settle(conn_id)
    }

    fn read_connection(&mut self, conn_id: usize) -> io::Result<()> {
        let observer = &self.observer;
        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };

        let mut budget = self.limits.max_buffer;

        while conn.is_reading() {
            let limit = conn.read_capacity().min(budget);
            if limit == 0 {
                break;
            }

            match conn.read_some(limit) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed connection",
                    ));
                }
                Ok(n) => {
                    budget -= n;
                    let lines = conn.process_input(observer);
                    trace!(conn_id, bytes = n, lines, "Read");
                    conn.flush()?;

                    if conn.apply_backpressure(&self.limits) == Backpressure::Paused {
                        debug!(
                            conn_id,
                            pending_output = conn.pending_output(),
                            buffered = conn.buffered_input(),
                            "Read paused"
                        );
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if budget == 0 && conn.is_reading() {
            self.backlog.push_back(conn_id);
        }

        Ok(())
    }

    /// Finish a closing connection or update its backpressure and interest.
    fn settle(&mut self, conn_id: usize) -> io::Result<()> {
        let drained = match self.connections.get(conn_id) {
            Some(conn) => conn.is_drained(),
            None => return Ok(()),
        };

        if drained {
            self.close_connection(conn_id, false);
            return Ok(());
        }

        let Some(conn) = self.connections.get_mut(conn_id) else {
            return Ok(());
        };

        match conn.apply_backpressure(&self.limits) {
            Backpressure::Paused => debug!(conn_id, "Read paused"),
            Backpressure::Resumed => {
                debug!(conn_id, "Read resumed");
                // Data may have arrived while paused; edge-triggered polls
                // will not report it again.
                self.backlog.push_back(conn_id);
            }
            Backpressure::Unchanged => {}
        }

        conn.sync_interest(self.poll.registry(), Token(conn_id))
    }

    fn close_connection(&mut self, conn_id: usize, error: bool) {
        if let Some(mut conn) = self.connections.remove(conn_id) {
            if let Err(e) = conn.deregister(self.poll.registry()) {
                trace!(conn_id, error = %e, "Deregister failed");
            }
            let peer = conn.peer();
            self.observer.on_close(conn.into_session(), error);
            debug!(conn_id, peer = %peer, error, "Connection closed");
        }
    }

    fn close_all(&mut self) {
        let ids = self.connections.ids();
        info!(connections = ids.len(), "Reactor shutting down");

        for conn_id in ids {
            if let Some(conn) = self.connections.get_mut(conn_id) {
                // Best effort: whatever fits in the socket buffer goes out
                let _ = conn.flush();
            }
            self.close_connection(conn_id, false);
        }

        let _ = self.poll.registry().deregister(&mut self.listener);
    }
}

/// Create a non-blocking TCP listener with `SO_REUSEADDR`.
pub fn bind_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

/// `EMFILE`/`ENFILE`: the process or system ran out of descriptors.
fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(code) if code == libc::EMFILE || code == libc::ENFILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Reply;
    use std::io::{BufRead, BufReader, Write};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Upper-cases every line; counts connects and closes.
    #[derive(Default, Clone)]
    struct UpperObserver {
        open: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl ConnectionObserver for UpperObserver {
        type Session = ();

        fn on_connect(&self, _peer: SocketAddr) {
            self.open.fetch_add(1, Ordering::SeqCst);
        }

        fn on_line(&self, _session: &mut (), line: &[u8], reply: &mut Reply<'_>) {
            if line == b"quit" {
                reply.error("bye");
                return;
            }
            reply.raw(&line.to_ascii_uppercase());
            reply.raw(b"\n");
        }

        fn on_line_too_long(&self, _session: &mut (), reply: &mut Reply<'_>) {
            reply.error("Line too long");
        }

        fn on_close(&self, _session: (), _error: bool) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn start(limits: Limits) -> (SocketAddr, ShutdownHandle, UpperObserver, thread::JoinHandle<()>) {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let observer = UpperObserver::default();
        let event_loop = EventLoop::new(listener, observer.clone(), limits, 128).unwrap();
        let addr = event_loop.local_addr().unwrap();
        let shutdown = event_loop.shutdown_handle();
        let handle = thread::spawn(move || event_loop.run().unwrap());
        (addr, shutdown, observer, handle)
    }

    fn connect(addr: SocketAddr) -> (std::net::TcpStream, BufReader<std::net::TcpStream>) {
        let stream = std::net::TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        (stream, reader)
    }

    #[test]
    fn test_round_trip_and_shutdown() {
        let (addr, shutdown, observer, handle) = start(Limits::default());
        let (mut stream, mut reader) = connect(addr);

        stream.write_all(b"hello\nwor").unwrap();
        stream.write_all(b"ld\n").unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "HELLO\n");
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "WORLD\n");

        shutdown.shutdown();
        handle.join().unwrap();

        assert_eq!(observer.open.load(Ordering::SeqCst), 1);
        assert_eq!(observer.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_reply_then_close() {
        let (addr, shutdown, observer, handle) = start(Limits::default());
        let (mut stream, mut reader) = connect(addr);

        stream.write_all(b"quit\n").unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "ERROR: bye\n");

        line.clear();
        assert_eq!(reader.read_line(&mut line).unwrap(), 0);

        shutdown.shutdown();
        handle.join().unwrap();
        assert_eq!(observer.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_limit() {
        let limits = Limits {
            max_connections: 1,
            ..Limits::default()
        };
        let (addr, shutdown, observer, handle) = start(limits);

        let (mut first, mut first_reader) = connect(addr);
        first.write_all(b"a\n").unwrap();
        let mut line = String::new();
        first_reader.read_line(&mut line).unwrap();
        assert_eq!(line, "A\n");

        // The second socket is accepted and dropped straight away
        let (_second, mut second_reader) = connect(addr);
        line.clear();
        assert_eq!(second_reader.read_line(&mut line).unwrap_or(0), 0);

        shutdown.shutdown();
        handle.join().unwrap();
        assert_eq!(observer.open.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_large_burst_is_fully_processed() {
        let limits = Limits {
            max_buffer: 64,
            max_line: 16,
            ..Limits::default()
        };
        let (addr, shutdown, _observer, handle) = start(limits);
        let (mut stream, mut reader) = connect(addr);

        let burst: Vec<u8> = (0..500).flat_map(|i| format!("l{i}\n").into_bytes()).collect();
        stream.write_all(&burst).unwrap();

        let mut line = String::new();
        for i in 0..500 {
            line.clear();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, format!("L{i}\n"));
        }

        shutdown.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_descriptor_exhaustion_detection() {
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::ECONNABORTED)));
        assert!(!is_descriptor_exhaustion(&io::Error::new(io::ErrorKind::Other, "x")));
    }
}
