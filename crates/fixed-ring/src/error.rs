//! Error types for ring operations

use thiserror::Error;

/// Result type for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors reported by a [`Ring`](crate::Ring) implementation
///
/// Only `RingFull` and `Timeout` are expected during normal operation; both
/// are backpressure signals that the caller answers by draining completions.
#[derive(Error, Debug)]
pub enum RingError {
    /// Not enough submission slots remain for the requested batch
    #[error("ring full: {requested} entries requested, {available} available")]
    RingFull {
        /// Entries in the rejected batch
        requested: usize,
        /// Submission slots still free
        available: usize,
    },

    /// No completion arrived before the wait deadline
    #[error("timed out waiting for completions")]
    Timeout,

    /// The batch violates the linking rules
    #[error("invalid chain: {0}")]
    InvalidChain(&'static str),

    /// A fixed slot index outside the registered table
    #[error("fixed slot {slot} outside registered table of {capacity}")]
    InvalidSlot {
        /// Offending slot index
        slot: u32,
        /// Size of the registered table
        capacity: u32,
    },

    /// The running kernel lacks a required io_uring feature
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Setup, registration or submission failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
