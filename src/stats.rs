//! Process-wide server counters.
//!
//! All counters are relaxed atomics: a [`StatsSnapshot`] is consistent enough
//! for display, not an atomic pair.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Aggregate counters shared by the reactor and display consumers.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Accepted pixel writes. Wraps around at `u64::MAX`.
    pixels: AtomicU64,
    /// Currently open connections.
    connections: AtomicUsize,
    /// Connections accepted since startup.
    accepted: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pixels: u64,
    pub connections: usize,
    pub accepted: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pixel_write(&self) {
        // fetch_add wraps on overflow
        self.pixels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the live connection count, saturating at zero.
    pub fn record_disconnect(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pixels: self.pixels.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pixel_counter() {
        let stats = ServerStats::new();
        for _ in 0..5 {
            stats.record_pixel_write();
        }
        assert_eq!(stats.snapshot().pixels, 5);
    }

    #[test]
    fn test_pixel_counter_wraps() {
        let stats = ServerStats::new();
        stats.pixels.store(u64::MAX, Ordering::Relaxed);
        stats.record_pixel_write();
        assert_eq!(stats.snapshot().pixels, 0);
    }

    #[test]
    fn test_connection_counter() {
        let stats = ServerStats::new();
        stats.record_connect();
        stats.record_connect();
        stats.record_disconnect();

        let snap = stats.snapshot();
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.accepted, 2);
    }

    #[test]
    fn test_disconnect_never_goes_negative() {
        let stats = ServerStats::new();
        stats.record_disconnect();
        assert_eq!(stats.snapshot().connections, 0);

        stats.record_connect();
        stats.record_disconnect();
        stats.record_disconnect();
        assert_eq!(stats.snapshot().connections, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(ServerStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_pixel_write();
                    }
                    stats.record_connect();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.pixels, 4000);
        assert_eq!(snap.connections, 4);
    }
}
