//! Synchronous emulation of the ring
//!
//! `BlockingRing` keeps the exact contract of the kernel backend (fixed
//! slots, silent link cancellation after a skip-success failure, weighted
//! accounting) but runs
//! each entry with an ordinary system call when [`Ring::submit`] is called.
//! Completions are therefore available immediately after submission, which
//! makes the pipeline deterministic under test and usable where io_uring
//! is blocked.

use crate::completions::CompletionQueue;
use crate::error::{Result, RingError};
use crate::op::{plan, Completion, Entry, FixedSlot, Op, Planned};
use crate::sys;
use crate::{Ring, RingConfig};
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;
use tracing::trace;

/// Ring backend that executes entries synchronously on submit
#[derive(Debug)]
pub struct BlockingRing {
    queue: CompletionQueue,
    files: Vec<Option<OwnedFd>>,
    unsubmitted: Vec<Planned>,
}

impl BlockingRing {
    /// Create an emulated ring with `config.depth` slots and
    /// `config.fixed_files` descriptor slots
    #[must_use]
    pub fn new(config: &RingConfig) -> Self {
        Self {
            queue: CompletionQueue::new(config.depth as usize),
            files: (0..config.fixed_files).map(|_| None).collect(),
            unsubmitted: Vec::new(),
        }
    }

    fn check_slots(&self, entries: &[Entry]) -> Result<()> {
        let capacity = self.files.len() as u32;
        for slot in entries.iter().filter_map(|e| e.op().slot()) {
            if slot >= capacity {
                return Err(RingError::InvalidSlot { slot, capacity });
            }
        }
        Ok(())
    }

    fn fd(&self, slot: FixedSlot) -> Option<i32> {
        self.files
            .get(slot as usize)
            .and_then(Option::as_ref)
            .map(AsRawFd::as_raw_fd)
    }

    fn install(&mut self, slot: FixedSlot, opened: std::result::Result<OwnedFd, i32>) -> i32 {
        match opened {
            Ok(fd) => {
                // Replacing an occupied slot closes the previous handle.
                self.files[slot as usize] = Some(fd);
                0
            }
            Err(errno) => errno,
        }
    }

    /// Run one operation
    ///
    /// # Safety
    ///
    /// Pointers inside `op` must satisfy the contract of [`Ring::push`].
    unsafe fn execute(&mut self, op: &Op) -> i32 {
        match *op {
            Op::MkDir { path, mode } => sys::mkdir(path, mode),
            Op::OpenDir { path, slot } => {
                let opened = sys::open(path, sys::DIR_OPEN_FLAGS, 0);
                self.install(slot, opened)
            }
            Op::GetDents { slot, buf, len } => match self.fd(slot) {
                Some(fd) => sys::getdents64(fd, buf, len),
                None => -libc::EBADF,
            },
            Op::Statx {
                path,
                flags,
                mask,
                buf,
            } => sys::statx(path, flags, mask, buf),
            Op::Open {
                path,
                flags,
                mode,
                slot,
            } => {
                let opened = sys::open(path, flags, mode);
                self.install(slot, opened)
            }
            Op::Read {
                slot,
                buf,
                len,
                offset,
            } => match self.fd(slot) {
                Some(fd) => sys::pread(fd, buf, len, offset),
                None => -libc::EBADF,
            },
            Op::Write {
                slot,
                buf,
                len,
                offset,
            } => match self.fd(slot) {
                Some(fd) => sys::pwrite(fd, buf, len, offset),
                None => -libc::EBADF,
            },
            Op::Close { slot } => match self.files[slot as usize].take() {
                Some(fd) => {
                    drop(fd);
                    0
                }
                None => -libc::EBADF,
            },
        }
    }
}

impl Ring for BlockingRing {
    fn depth(&self) -> usize {
        self.queue.depth()
    }

    fn fixed_slots(&self) -> u32 {
        self.files.len() as u32
    }

    fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    unsafe fn push(&mut self, entries: &[Entry]) -> Result<()> {
        let planned = plan(entries)?;
        self.check_slots(entries)?;
        self.queue.reserve(entries.len())?;
        self.unsubmitted.extend(planned);
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        let batch = std::mem::take(&mut self.unsubmitted);
        let submitted = batch.len();
        let mut chain_broken = false;
        for planned in &batch {
            let op = planned.entry.op();
            if chain_broken {
                trace!(op = op.name(), tag = planned.entry.tag(), "cancelled");
            } else {
                // SAFETY: push() callers guarantee the pointers stay valid
                // until the covering completion is observed.
                let result = unsafe { self.execute(op) };
                trace!(op = op.name(), tag = planned.entry.tag(), result, "emulated");
                if planned.reports(result) {
                    self.queue.post(planned.completion(result));
                    chain_broken = planned.entry.is_linked();
                }
            }
            if !planned.entry.is_linked() {
                chain_broken = false;
            }
        }
        Ok(submitted)
    }

    fn wait_for_completions(&mut self, count: usize, _timeout: Option<Duration>) -> Result<()> {
        if self.queue.ready_len() < count && !self.unsubmitted.is_empty() {
            self.submit()?;
        }
        // Nothing completes later in a synchronous backend.
        if self.queue.ready_len() >= count {
            Ok(())
        } else {
            Err(RingError::Timeout)
        }
    }

    fn peek_completion(&mut self) -> Option<Completion> {
        self.queue.front()
    }

    fn acknowledge(&mut self, completion: &Completion) {
        self.queue.acknowledge(completion);
    }

    fn acknowledge_n(&mut self, count: usize) {
        self.queue.acknowledge_n(count);
    }
}
