//! Protocol implementations.
//!
//! Each protocol plugs into the runtime as a
//! [`ConnectionObserver`](crate::runtime::ConnectionObserver).
//!
//! - `pixelflut`: canvas drawing protocol

pub mod pixelflut;
