//! Error handling and types

use fixed_ring::RingError;
use std::path::PathBuf;
use thiserror::Error;

/// Tree-copy errors
///
/// Resource exhaustion never shows up here: a full ring, an empty slot
/// table or an empty buffer pool only defer work. Everything below ends
/// the run.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Standard I/O error outside the ring
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The ring adapter failed
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// An operation completed with a negative result
    #[error("{op} failed for {}: {source}", path.display())]
    OperationFailed {
        /// Operation kind (`mkdir`, `open`, `read`, ...)
        op: &'static str,
        /// Path the operation was about
        path: PathBuf,
        /// OS error decoded from the completion
        source: std::io::Error,
    },

    /// A write (or a read outside a link chain) moved fewer bytes than asked
    #[error("short {op} on {}: {actual} of {expected} bytes", path.display())]
    ShortTransfer {
        /// Operation kind
        op: &'static str,
        /// File being transferred
        path: PathBuf,
        /// Bytes requested
        expected: u32,
        /// Bytes moved
        actual: u32,
    },

    /// A directory read returned a record that cannot be decoded
    #[error("malformed directory entry in {} at byte {offset}: {reason}", dir.display())]
    MalformedDirent {
        /// Directory being scanned
        dir: PathBuf,
        /// Offset of the bad record within the read
        offset: usize,
        /// What was wrong with it
        reason: &'static str,
    },

    /// A copy job was asked to move backwards in its state machine
    #[error("invalid state transition for {}: {from} -> {to}", path.display())]
    InvalidTransition {
        /// File being copied
        path: PathBuf,
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// A path cannot be passed to the kernel (interior NUL byte)
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Invalid configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Jobs remain but nothing is in flight and nothing can be submitted
    #[error("copy stalled with {jobs} jobs outstanding and nothing in flight")]
    Stalled {
        /// Jobs (files plus directories) still alive
        jobs: usize,
    },

    /// Internal bookkeeping error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CopyError {
    /// Build an [`OperationFailed`](CopyError::OperationFailed) from a raw
    /// negative completion result
    pub fn from_result(op: &'static str, path: impl Into<PathBuf>, result: i32) -> Self {
        CopyError::OperationFailed {
            op,
            path: path.into(),
            source: std::io::Error::from_raw_os_error(-result),
        }
    }
}

pub type Result<T> = std::result::Result<T, CopyError>;
