//! Domain Layer - Core ingestion types and pure algorithms.
//!
//! Nothing here performs I/O. Types serialize with serde so they can be
//! logged and exposed on the status endpoint as-is.

/// Tick buffer that coalesces observations between flushes.
pub mod buffer;

/// Venue grouping and batch chunking.
pub mod grouping;

/// Instruments, observations and persisted price points.
pub mod instrument;

/// Transport connection state and status.
pub mod streaming;
