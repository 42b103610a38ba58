//! Fixed descriptor slot allocator
//!
//! Tracks which indices of the ring's registered file table are in use.
//! Running out of slots is backpressure: the caller drains completions and
//! retries later.

use fixed_ring::FixedSlot;
use thiserror::Error;

/// Slot allocator failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Every slot is busy
    #[error("all fixed slots are busy")]
    Exhausted,
    /// The slot was not busy (double release or never acquired)
    #[error("fixed slot {0} released while not busy")]
    InvalidRelease(FixedSlot),
}

/// Allocator over `capacity` fixed slots
#[derive(Debug)]
pub struct SlotAllocator {
    busy: Vec<bool>,
    free: Vec<FixedSlot>,
    peak_busy: usize,
}

impl SlotAllocator {
    /// Create an allocator with every slot free
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            busy: vec![false; capacity as usize],
            // Reversed so low indices are handed out first.
            free: (0..capacity).rev().collect(),
            peak_busy: 0,
        }
    }

    /// Take a free slot
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::Exhausted`] if every slot is busy.
    pub fn acquire(&mut self) -> Result<FixedSlot, SlotError> {
        let slot = self.free.pop().ok_or(SlotError::Exhausted)?;
        self.busy[slot as usize] = true;
        self.peak_busy = self.peak_busy.max(self.busy());
        Ok(slot)
    }

    /// Return a busy slot
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::InvalidRelease`] if `slot` is out of range or
    /// not currently busy.
    pub fn release(&mut self, slot: FixedSlot) -> Result<(), SlotError> {
        match self.busy.get_mut(slot as usize) {
            Some(busy) if *busy => {
                *busy = false;
                self.free.push(slot);
                Ok(())
            }
            _ => Err(SlotError::InvalidRelease(slot)),
        }
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn busy(&self) -> usize {
        self.busy.len() - self.free.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.busy.len()
    }

    /// Highest number of slots busy at once
    #[must_use]
    pub fn peak_busy(&self) -> usize {
        self.peak_busy
    }
}
