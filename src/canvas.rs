//! Shared pixel canvas.
//!
//! The canvas is a fixed-size, row-major byte buffer shared between the
//! reactor thread (which executes client commands) and any rendering
//! consumer holding a [`crate::ServerHandle`].
//!
//! ## Consistency model
//!
//! The canvas is deliberately **not** guarded by a lock. Every channel byte
//! is an `AtomicU8` accessed with `Relaxed` ordering, so concurrent readers
//! and writers interleave at byte granularity:
//!
//! - every write becomes visible eventually,
//! - no byte is ever corrupted,
//! - a reader may observe a pixel whose channels come from two different
//!   writes (transient tearing, cosmetic only).
//!
//! No operation needs multi-pixel atomicity. Adding a mutex here would put
//! the protocol engine and the display path in contention on every pixel.

use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;

/// Storage layout of a single pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Three bytes per pixel: red, green, blue.
    #[default]
    Rgb,
    /// Four bytes per pixel: red, green, blue, alpha.
    ///
    /// The alpha byte is kept at `0xFF`; incoming alpha only drives blending.
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// An RGBA color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 0xFF }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Grayscale color: `R = G = B = v`, fully opaque.
    pub const fn gray(v: u8) -> Self {
        Self::rgb(v, v, v)
    }

    /// Build from a packed `0xRRGGBBAA` value.
    pub const fn from_rgba_u32(value: u32) -> Self {
        let [r, g, b, a] = value.to_be_bytes();
        Self { r, g, b, a }
    }

    /// Build from a packed `0xRRGGBB` value with full opacity.
    pub const fn from_rgb_u32(value: u32) -> Self {
        let [_, r, g, b] = value.to_be_bytes();
        Self::rgb(r, g, b)
    }

    /// Packed `0xRRGGBB`, alpha dropped.
    pub const fn to_rgb_u32(self) -> u32 {
        u32::from_be_bytes([0, self.r, self.g, self.b])
    }
}

impl fmt::Display for Color {
    /// Formats as six uppercase hex digits; alpha is never shown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.to_rgb_u32())
    }
}

/// Canvas construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanvasError {
    #[error("canvas dimensions must be positive, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("canvas of {width}x{height} pixels does not fit in memory")]
    TooLarge { width: u32, height: u32 },
}

/// Read-only copy of the canvas for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer: Vec<u8>,
}

/// Fixed-size shared pixel buffer.
pub struct Canvas {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Box<[AtomicU8]>,
}

impl Canvas {
    /// Create a black canvas.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, CanvasError> {
        if width == 0 || height == 0 {
            return Err(CanvasError::EmptyDimensions { width, height });
        }

        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or(CanvasError::TooLarge { width, height })?;

        let data: Box<[AtomicU8]> = (0..len)
            .map(|i| {
                // Alpha bytes of an RGBA canvas start opaque
                let opaque_alpha = format == PixelFormat::Rgba && i % 4 == 3;
                AtomicU8::new(if opaque_alpha { 0xFF } else { 0 })
            })
            .collect();

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Canvas dimensions as `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Length of the backing buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Byte offset of a pixel, or `None` outside the canvas.
    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if !self.contains(x, y) {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        Some(index * self.format.bytes_per_pixel())
    }

    /// Read a pixel. Coordinates outside the canvas read as black.
    pub fn get(&self, x: u32, y: u32) -> Color {
        match self.offset(x, y) {
            Some(off) => Color::rgb(
                self.data[off].load(Ordering::Relaxed),
                self.data[off + 1].load(Ordering::Relaxed),
                self.data[off + 2].load(Ordering::Relaxed),
            ),
            None => Color::BLACK,
        }
    }

    /// Write a pixel using the alpha blend rule.
    ///
    /// Returns `false` without touching anything when the coordinates are
    /// outside the canvas.
    pub fn set(&self, x: u32, y: u32, color: Color) -> bool {
        match self.offset(x, y) {
            Some(off) => {
                self.blend_at(off, color);
                true
            }
            None => false,
        }
    }

    /// Apply the blend rule to every pixel.
    pub fn fill(&self, color: Color) {
        let step = self.format.bytes_per_pixel();
        for off in (0..self.data.len()).step_by(step) {
            self.blend_at(off, color);
        }
    }

    fn blend_at(&self, off: usize, color: Color) {
        match color.a {
            0 => {}
            0xFF => {
                self.data[off].store(color.r, Ordering::Relaxed);
                self.data[off + 1].store(color.g, Ordering::Relaxed);
                self.data[off + 2].store(color.b, Ordering::Relaxed);
            }
            a => {
                for (i, incoming) in [color.r, color.g, color.b].into_iter().enumerate() {
                    let slot = &self.data[off + i];
                    let existing = slot.load(Ordering::Relaxed);
                    slot.store(blend_channel(existing, incoming, a), Ordering::Relaxed);
                }
            }
        }
    }

    /// Copy the raw buffer into `dst`, returning the number of bytes copied.
    pub fn copy_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.data.len());
        for (out, byte) in dst[..n].iter_mut().zip(self.data.iter()) {
            *out = byte.load(Ordering::Relaxed);
        }
        n
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut buffer = vec![0u8; self.data.len()];
        self.copy_into(&mut buffer);
        Snapshot {
            width: self.width,
            height: self.height,
            format: self.format,
            buffer,
        }
    }
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// `(a * incoming + (255 - a) * existing) / 255`
fn blend_channel(existing: u8, incoming: u8, alpha: u8) -> u8 {
    let a = alpha as u32;
    ((a * incoming as u32 + (0xFF - a) * existing as u32) / 0xFF) as u8
}
