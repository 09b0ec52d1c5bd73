//! Pixelflut server assembly.
//!
//! A [`ServerContext`] is built once at startup and shared by reference with
//! the protocol handler and with any display consumer. [`Server`] ties it to
//! a bound listener and the reactor; [`ServerHandle`] is the in-process
//! surface a display uses to read the canvas and report window events.

use crate::canvas::{Canvas, CanvasError, Color, Snapshot};
use crate::config::Config;
use crate::display::{Key, KeyAction};
use crate::protocols::pixelflut::PixelflutHandler;
use crate::runtime::{bind_listener, EventLoop, ShutdownHandle};
use crate::stats::ServerStats;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Fatal errors while bringing the server up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("failed to create event loop: {0}")]
    Poll(#[source] io::Error),
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Shared state every component works against.
#[derive(Debug)]
pub struct ServerContext {
    canvas: Canvas,
    stats: ServerStats,
    /// Effective viewport reported by `SIZE`, packed as `width << 32 | height`.
    viewport: AtomicU64,
}

impl ServerContext {
    pub fn new(canvas: Canvas) -> Self {
        let (width, height) = canvas.size();
        Self {
            canvas,
            stats: ServerStats::new(),
            viewport: AtomicU64::new(pack(width, height)),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Size reported to clients. Defaults to the canvas size.
    pub fn size(&self) -> (u32, u32) {
        unpack(self.viewport.load(Ordering::Relaxed))
    }

    /// Set the reported size, clamped to the canvas. Zero is clamped to one.
    pub fn resize(&self, width: u32, height: u32) {
        let (cw, ch) = self.canvas.size();
        let (w, h) = (width.clamp(1, cw), height.clamp(1, ch));
        self.viewport.store(pack(w, h), Ordering::Relaxed);
    }
}

fn pack(width: u32, height: u32) -> u64 {
    (u64::from(width) << 32) | u64::from(height)
}

fn unpack(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, packed as u32)
}

/// Server instance
pub struct Server {
    context: Arc<ServerContext>,
    event_loop: EventLoop<PixelflutHandler>,
}

impl Server {
    /// Allocate the canvas and bind the listening socket.
    pub fn bind(config: &Config) -> Result<Self, StartupError> {
        let addr = config.listen_addr()?;
        let canvas = Canvas::new(config.width, config.height, config.format)?;
        let context = Arc::new(ServerContext::new(canvas));

        let listener = bind_listener(addr).map_err(|source| StartupError::Bind { addr, source })?;
        let handler = PixelflutHandler::new(Arc::clone(&context));
        let event_loop =
            EventLoop::new(listener, handler, config.limits(), config.event_capacity)
                .map_err(StartupError::Poll)?;

        info!(
            addr = ?event_loop.local_addr().ok(),
            width = config.width,
            height = config.height,
            format = ?config.format,
            "Server listening"
        );

        Ok(Server {
            context,
            event_loop,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.event_loop.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            context: Arc::clone(&self.context),
            shutdown: self.event_loop.shutdown_handle(),
        }
    }

    /// Serve until a handle requests shutdown.
    pub fn run(self) -> io::Result<()> {
        self.event_loop.run()?;
        let stats = self.context.stats().snapshot();
        info!(
            pixels = stats.pixels,
            accepted = stats.accepted,
            "Server stopped"
        );
        Ok(())
    }
}

/// In-process control surface for a display or the hosting binary.
#[derive(Clone)]
pub struct ServerHandle {
    context: Arc<ServerContext>,
    shutdown: ShutdownHandle,
}

impl ServerHandle {
    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Copy of the current canvas for rendering.
    pub fn snapshot(&self) -> Snapshot {
        self.context.canvas().snapshot()
    }

    /// Copy the canvas into a caller-owned frame buffer.
    pub fn copy_into(&self, dst: &mut [u8]) -> usize {
        self.context.canvas().copy_into(dst)
    }

    /// Stop accepting, close every connection and return from [`Server::run`].
    pub fn window_closed(&self) {
        info!("Window closed, shutting down");
        self.shutdown.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Apply the built-in key bindings. `Quit` also shuts the server down;
    /// the other actions are for the display to carry out.
    pub fn key_event(&self, key: Key) -> KeyAction {
        let action = key.action();
        debug!(?key, ?action, "Key event");
        if action == KeyAction::Quit {
            self.window_closed();
        }
        action
    }

    /// The display's effective viewport changed.
    pub fn resized(&self, width: u32, height: u32) {
        self.context.resize(width, height);
        let (w, h) = self.context.size();
        debug!(width = w, height = h, "Viewport resized");
    }

    /// Blend `color` over the whole canvas.
    pub fn clear(&self, color: Color) {
        self.context.canvas().fill(color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::PixelFormat;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            width: 16,
            height: 8,
            ..Config::default()
        }
    }

    #[test]
    fn test_viewport_defaults_to_canvas() {
        let ctx = ServerContext::new(Canvas::new(640, 480, PixelFormat::Rgb).unwrap());
        assert_eq!(ctx.size(), (640, 480));
    }

    #[test]
    fn test_viewport_is_clamped() {
        let ctx = ServerContext::new(Canvas::new(640, 480, PixelFormat::Rgb).unwrap());
        ctx.resize(320, 200);
        assert_eq!(ctx.size(), (320, 200));
        ctx.resize(4000, 4000);
        assert_eq!(ctx.size(), (640, 480));
        ctx.resize(0, 0);
        assert_eq!(ctx.size(), (1, 1));
        assert_eq!(ctx.canvas().size(), (640, 480));
    }

    #[test]
    fn test_handle_canvas_access() {
        let server = Server::bind(&test_config()).unwrap();
        let handle = server.handle();

        handle.clear(Color::rgb(1, 2, 3));
        let snap = handle.snapshot();
        assert_eq!((snap.width, snap.height), (16, 8));
        assert_eq!(&snap.buffer[..3], &[1, 2, 3]);

        let mut frame = vec![0u8; 16 * 8 * 3];
        assert_eq!(handle.copy_into(&mut frame), frame.len());
        assert_eq!(frame, snap.buffer);
    }

    #[test]
    fn test_key_event_quit_shuts_down() {
        let server = Server::bind(&test_config()).unwrap();
        let handle = server.handle();

        assert_eq!(handle.key_event(Key::F11), KeyAction::ToggleFullscreen);
        assert!(!handle.is_shutdown());
        assert_eq!(handle.key_event(Key::Escape), KeyAction::Quit);
        assert!(handle.is_shutdown());

        // Shutdown requested before run: the loop exits immediately
        server.run().unwrap();
    }

    #[test]
    fn test_bind_rejects_bad_canvas() {
        let config = Config {
            width: 0,
            ..test_config()
        };
        assert!(matches!(
            Server::bind(&config),
            Err(StartupError::Canvas(_))
        ));
    }
}
