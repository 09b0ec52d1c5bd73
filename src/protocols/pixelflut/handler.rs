//! Pixelflut command dispatcher.
//!
//! Implements the reactor's [`ConnectionObserver`]: every complete line is
//! parsed and executed against the shared [`ServerContext`], and responses
//! are queued on the connection through its [`Reply`].

use super::parser::{parse_line, Command};
use crate::runtime::{ConnectionObserver, Reply};
use crate::server::ServerContext;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Static usage text returned by `HELP`.
pub const HELP_TEXT: &str = "\
PX x y: Get color at position (x,y)
PX x y rrggbb: Draw a pixel
PX x y rrggbbaa: Draw a pixel with alpha blending
PX x y ww: Draw a grayscale pixel
SIZE: Get canvas size
STATS: Get pixel and connection counters
HELP: Show this text";

/// Per-client attachment.
#[derive(Debug)]
pub struct ClientSession {
    peer: SocketAddr,
    connected_at: Instant,
    /// Pixels this client has written.
    pixels: u64,
}

impl ClientSession {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn pixels(&self) -> u64 {
        self.pixels
    }
}

/// Dispatches pixelflut commands against the shared canvas.
pub struct PixelflutHandler {
    ctx: Arc<ServerContext>,
}

impl PixelflutHandler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    fn execute(&self, session: &mut ClientSession, command: Command, reply: &mut Reply<'_>) {
        match command {
            Command::GetPixel { x, y } => {
                let color = self.ctx.canvas().get(x, y);
                reply.line(format_args!("PX {x} {y} {color}"));
            }
            Command::SetPixel { x, y, color } => {
                if self.ctx.canvas().set(x, y, color) {
                    self.ctx.stats().record_pixel_write();
                    session.pixels += 1;
                }
            }
            Command::QuerySize => {
                let (width, height) = self.ctx.size();
                reply.line(format_args!("SIZE {width} {height}"));
            }
            Command::QueryStats => {
                let stats = self.ctx.stats().snapshot();
                reply.line(format_args!(
                    "STATS px:{} conn:{}",
                    stats.pixels, stats.connections
                ));
            }
            Command::QueryHelp => reply.line(format_args!("{HELP_TEXT}")),
            Command::Unknown => reply.error("Unknown command"),
        }
    }
}

impl ConnectionObserver for PixelflutHandler {
    type Session = ClientSession;

    fn on_connect(&self, peer: SocketAddr) -> ClientSession {
        self.ctx.stats().record_connect();
        debug!(peer = %peer, "Client connected");
        ClientSession {
            peer,
            connected_at: Instant::now(),
            pixels: 0,
        }
    }

    fn on_line(&self, session: &mut ClientSession, line: &[u8], reply: &mut Reply<'_>) {
        match parse_line(line) {
            Ok(command) => {
                trace!(peer = %session.peer, ?command, "Processing command");
                self.execute(session, command, reply);
            }
            Err(e) => {
                warn!(
                    peer = %session.peer,
                    line = %String::from_utf8_lossy(line),
                    error = %e,
                    "Protocol error"
                );
                reply.error(e);
            }
        }
    }

    fn on_line_too_long(&self, session: &mut ClientSession, reply: &mut Reply<'_>) {
        warn!(peer = %session.peer, "Line too long");
        reply.error("Line too long");
    }

    fn on_close(&self, session: ClientSession, error: bool) {
        self.ctx.stats().record_disconnect();

        let secs = session.connected_at.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            session.pixels as f64 / secs
        } else {
            0.0
        };
        debug!(
            peer = %session.peer,
            pixels = session.pixels,
            px_per_sec = format_args!("{rate:.1}"),
            error,
            "Client disconnected"
        );
    }
}
