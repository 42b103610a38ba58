//! Submission/completion ring with a registered descriptor table
//!
//! This crate exposes the small slice of io_uring that a bulk file copier
//! needs: directory creation, directory reads, `statx`, opens into fixed
//! slots, positional reads and writes, and closes, with link chains and
//! skip-success completions.
//!
//! # Backends
//!
//! - [`KernelRing`]: a real io_uring instance (via the `io-uring` crate)
//!   with a sparse registered file table
//! - [`BlockingRing`]: a synchronous emulation with the same contract, used
//!   by tests and on hosts where io_uring is unavailable
//!
//! # Accounting
//!
//! Every pushed entry occupies one submission slot until the completion
//! that covers it is acknowledged. A chain reports exactly one completion:
//! the first entry that fails (or transfers short), or else its last entry.
//! The entries after a failure are cancelled without a completion of their
//! own, matching the kernel's behaviour for skip-success links, so the one
//! reported completion retires the whole chain (see [`Completion::weight`]).

pub mod blocking;
mod completions;
pub mod error;
pub mod op;
pub mod probe;
mod sys;
pub mod uring;

pub use blocking::BlockingRing;
pub use error::{Result, RingError};
pub use op::{Completion, Entry, FixedSlot, Op};
pub use uring::KernelRing;

use std::time::Duration;

/// Sizing for a ring backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingConfig {
    /// Submission queue depth (maximum entries in flight)
    pub depth: u32,
    /// Number of registered descriptor slots
    pub fixed_files: u32,
    /// Enable kernel-side submission polling with this idle time in ms
    pub sqpoll_idle: Option<u32>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            depth: 1024,
            fixed_files: 1024,
            sqpoll_idle: None,
        }
    }
}

/// A submission/completion ring
///
/// Entries are pushed in batches, handed to the backend by [`submit`], and
/// their results are read back with [`peek_completion`] followed by
/// [`acknowledge`]. A peeked completion stays queued until acknowledged.
///
/// [`submit`]: Ring::submit
/// [`peek_completion`]: Ring::peek_completion
/// [`acknowledge`]: Ring::acknowledge
pub trait Ring {
    /// Maximum number of entries in flight
    fn depth(&self) -> usize;

    /// Size of the registered descriptor table
    fn fixed_slots(&self) -> u32;

    /// Entries pushed whose covering completion is not yet acknowledged
    fn in_flight(&self) -> usize;

    /// Submission slots still free
    fn available(&self) -> usize {
        self.depth().saturating_sub(self.in_flight())
    }

    /// Queue a batch of entries
    ///
    /// The batch is accepted whole or not at all. Consecutive linked entries
    /// form a chain; the last entry of the batch must not be linked.
    ///
    /// # Errors
    ///
    /// - [`RingError::RingFull`] if fewer than `entries.len()` slots are free
    /// - [`RingError::InvalidChain`] for malformed link markings
    /// - [`RingError::InvalidSlot`] for a slot outside the registered table
    ///
    /// # Safety
    ///
    /// Every pointer inside the entries must remain valid and unmoved until
    /// the completion covering that entry has been acknowledged, or until
    /// the ring is dropped.
    unsafe fn push(&mut self, entries: &[Entry]) -> Result<()>;

    /// Hand queued entries to the backend, returning how many were submitted
    ///
    /// # Errors
    ///
    /// Returns an error if the submission system call fails.
    fn submit(&mut self) -> Result<usize>;

    /// Block until at least `count` completions are ready
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Timeout`] if the deadline passes first, or an
    /// I/O error if waiting fails.
    fn wait_for_completions(&mut self, count: usize, timeout: Option<Duration>) -> Result<()>;

    /// The oldest ready completion, without consuming it
    fn peek_completion(&mut self) -> Option<Completion>;

    /// Consume a peeked completion and retire the slots it covers
    fn acknowledge(&mut self, completion: &Completion);

    /// Consume the `count` oldest ready completions
    fn acknowledge_n(&mut self, count: usize);
}
