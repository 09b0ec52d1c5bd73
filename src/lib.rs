//! flutd: a pixelflut canvas server
//!
//! Clients connect over TCP and draw on a shared canvas with a line-based
//! ASCII protocol (`PX x y rrggbb`). The server is a single-threaded mio
//! reactor; the canvas is shared lock-free with any in-process display.
//!
//! Features:
//! - Pixel reads and writes with grayscale, RGB and alpha-blended RGBA colors
//! - Per-connection line limits and read backpressure
//! - Pixel and connection counters
//! - Configuration via CLI arguments or TOML file

pub mod canvas;
pub mod config;
pub mod display;
pub mod protocols;
pub mod runtime;
pub mod server;
pub mod stats;

pub use canvas::{Canvas, Color, PixelFormat, Snapshot};
pub use config::Config;
pub use display::{Key, KeyAction};
pub use server::{Server, ServerContext, ServerHandle, StartupError};
pub use stats::{ServerStats, StatsSnapshot};
