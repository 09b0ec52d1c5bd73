//! Per-connection line buffering.
//!
//! Inbound bytes accumulate in a `BytesMut` until a `\n` terminator is
//! found. Complete lines are split off without copying and handed out in
//! arrival order. Bytes are never dropped: each one ends up in an emitted
//! line or stays buffered until more input arrives (or the line turns out
//! to be too long).
//!
//! Only `\n` terminates a line. A `\r` before it is ordinary line content.

use bytes::{Bytes, BytesMut};
use std::io::{self, Read};
use thiserror::Error;

/// A line exceeded the configured maximum length.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("line exceeds {max} bytes")]
pub struct LineTooLong {
    pub max: usize,
}

/// Accumulator that turns a byte stream into lines.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Bytes already scanned for a terminator (avoids rescanning).
    scanned: usize,
    max_line: usize,
    high_watermark: usize,
}

impl LineBuffer {
    /// Create a buffer that rejects lines longer than `max_line` bytes
    /// (terminator excluded) and holds at most `high_watermark` bytes.
    pub fn new(max_line: usize, high_watermark: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(high_watermark.min(16 * 1024)),
            scanned: 0,
            max_line,
            high_watermark,
        }
    }

    /// Buffered bytes not yet emitted as a line.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Space left below the high watermark.
    pub fn available(&self) -> usize {
        self.high_watermark.saturating_sub(self.buf.len())
    }

    /// Whether the buffer has reached the high watermark.
    pub fn is_full(&self) -> bool {
        self.buf.len() >= self.high_watermark
    }

    /// Whether the buffer has drained below the low watermark (half of the
    /// high watermark).
    pub fn below_low_watermark(&self) -> bool {
        self.buf.len() < self.high_watermark / 2
    }

    /// Append raw bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Read at most `limit` bytes from `reader` straight into the buffer.
    ///
    /// Returns what the reader returned; `Ok(0)` means end of stream.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R, limit: usize) -> io::Result<usize> {
        let start = self.buf.len();
        self.buf.resize(start + limit, 0);
        let result = reader.read(&mut self.buf[start..]);
        let n = *result.as_ref().unwrap_or(&0);
        self.buf.truncate(start + n);
        result
    }

    /// Extract the next complete line, without its `\n`.
    ///
    /// Returns `Ok(None)` when no complete line is buffered yet, and
    /// `Err(LineTooLong)` once more than `max_line` bytes precede the next
    /// terminator (or no terminator has shown up within that many bytes).
    pub fn next_line(&mut self) -> Result<Option<Bytes>, LineTooLong> {
        // A terminator is only acceptable within max_line + 1 bytes
        let window = self.buf.len().min(self.max_line + 1);
        let found = self.buf[self.scanned.min(window)..window]
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| pos + self.scanned.min(window));

        match found {
            Some(end) => {
                let mut line = self.buf.split_to(end + 1);
                line.truncate(end);
                self.scanned = 0;
                Ok(Some(line.freeze()))
            }
            None if self.buf.len() > self.max_line => Err(LineTooLong { max: self.max_line }),
            None => {
                self.scanned = window;
                Ok(None)
            }
        }
    }

    /// Discard everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}
