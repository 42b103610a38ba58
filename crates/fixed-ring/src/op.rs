//! Ring entries, operations and completions
//!
//! An [`Entry`] pairs one [`Op`] with the caller's tag and the two chain
//! markings the ring understands: *linked* (the next entry starts only after
//! this one succeeds) and *skip-success* (no completion is produced when the
//! entry succeeds). A batch handed to [`Ring::push`](crate::Ring::push) is
//! planned once so every completion knows how many submission slots it
//! retires and where in its link chain it sits.

use crate::error::{Result, RingError};
use std::io;

/// Index into the ring's registered (fixed) descriptor table
pub type FixedSlot = u32;

/// Bit reserved in the user data for completions a backend handles itself
pub(crate) const INTERNAL_FLAG: u64 = 1 << 63;

const INDEX_SHIFT: u32 = 32;
const WEIGHT_SHIFT: u32 = 40;

/// One operation understood by the ring
///
/// Pointer fields are borrowed from memory owned by the caller. They must
/// stay valid, and must not move, until the completion covering the entry
/// has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `mkdirat(AT_FDCWD, path, mode)`
    MkDir {
        /// NUL-terminated destination path
        path: *const libc::c_char,
        /// Mode bits before umask
        mode: libc::mode_t,
    },
    /// Open a directory for reading into a fixed slot
    OpenDir {
        /// NUL-terminated directory path
        path: *const libc::c_char,
        /// Slot receiving the handle
        slot: FixedSlot,
    },
    /// Bulk directory read (`getdents64`) on a fixed slot
    GetDents {
        /// Slot holding an open directory
        slot: FixedSlot,
        /// Destination buffer
        buf: *mut u8,
        /// Buffer length in bytes
        len: u32,
    },
    /// `statx(AT_FDCWD, path, flags, mask, buf)`
    Statx {
        /// NUL-terminated path
        path: *const libc::c_char,
        /// `AT_*` flags
        flags: i32,
        /// `STATX_*` mask
        mask: u32,
        /// Result buffer
        buf: *mut libc::statx,
    },
    /// `openat(AT_FDCWD, path, flags, mode)` installed into a fixed slot
    Open {
        /// NUL-terminated path
        path: *const libc::c_char,
        /// `O_*` flags
        flags: i32,
        /// Creation mode
        mode: libc::mode_t,
        /// Slot receiving the handle
        slot: FixedSlot,
    },
    /// Positional read from a fixed slot
    Read {
        /// Source slot
        slot: FixedSlot,
        /// Destination buffer
        buf: *mut u8,
        /// Bytes requested
        len: u32,
        /// File offset
        offset: u64,
    },
    /// Positional write to a fixed slot
    Write {
        /// Destination slot
        slot: FixedSlot,
        /// Source buffer
        buf: *const u8,
        /// Bytes to write
        len: u32,
        /// File offset
        offset: u64,
    },
    /// Close the handle held in a fixed slot
    Close {
        /// Slot to close
        slot: FixedSlot,
    },
}

impl Op {
    /// Short operation name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Op::MkDir { .. } => "mkdir",
            Op::OpenDir { .. } => "opendir",
            Op::GetDents { .. } => "getdents",
            Op::Statx { .. } => "statx",
            Op::Open { .. } => "open",
            Op::Read { .. } => "read",
            Op::Write { .. } => "write",
            Op::Close { .. } => "close",
        }
    }

    /// Fixed slot the operation targets, if any
    #[must_use]
    pub fn slot(&self) -> Option<FixedSlot> {
        match *self {
            Op::OpenDir { slot, .. }
            | Op::GetDents { slot, .. }
            | Op::Open { slot, .. }
            | Op::Read { slot, .. }
            | Op::Write { slot, .. }
            | Op::Close { slot } => Some(slot),
            Op::MkDir { .. } | Op::Statx { .. } => None,
        }
    }

    /// Bytes requested by a read or write
    pub(crate) fn transfer_len(&self) -> Option<u32> {
        match *self {
            Op::Read { len, .. } | Op::Write { len, .. } => Some(len),
            _ => None,
        }
    }
}

/// An operation plus its tag and chain markings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    op: Op,
    tag: u32,
    linked: bool,
    skip_success: bool,
}

impl Entry {
    /// Create an unlinked entry that reports its completion
    #[must_use]
    pub fn new(op: Op, tag: u32) -> Self {
        Self {
            op,
            tag,
            linked: false,
            skip_success: false,
        }
    }

    /// Make the next entry of the batch depend on this one
    #[must_use]
    pub fn linked(mut self) -> Self {
        self.linked = true;
        self
    }

    /// Suppress the completion when this entry succeeds
    #[must_use]
    pub fn skip_success(mut self) -> Self {
        self.skip_success = true;
        self
    }

    /// The operation
    #[must_use]
    pub fn op(&self) -> &Op {
        &self.op
    }

    /// The caller's tag
    #[must_use]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Whether the next entry is linked to this one
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Whether success is reported
    #[must_use]
    pub fn is_skip_success(&self) -> bool {
        self.skip_success
    }
}

/// Result of one operation, as delivered by the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    tag: u32,
    result: i32,
    link_index: u8,
    weight: u16,
}

impl Completion {
    pub(crate) fn new(tag: u32, result: i32, link_index: u8, weight: u16) -> Self {
        Self {
            tag,
            result,
            link_index,
            weight,
        }
    }

    pub(crate) fn from_user_data(user_data: u64, result: i32) -> Self {
        Self {
            tag: user_data as u32,
            result,
            link_index: (user_data >> INDEX_SHIFT) as u8,
            weight: (user_data >> WEIGHT_SHIFT) as u16,
        }
    }

    /// The tag of the entry that produced this completion
    #[must_use]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Raw result: non-negative on success, `-errno` on failure
    #[must_use]
    pub fn result(&self) -> i32 {
        self.result
    }

    /// Position of the producing entry within its link chain
    #[must_use]
    pub fn link_index(&self) -> u8 {
        self.link_index
    }

    /// Submission slots retired when this completion is acknowledged
    #[must_use]
    pub fn weight(&self) -> u16 {
        self.weight
    }

    /// Check if the operation failed
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.result < 0
    }

    /// The OS error of a failed operation
    #[must_use]
    pub fn error(&self) -> Option<io::Error> {
        self.is_error()
            .then(|| io::Error::from_raw_os_error(-self.result))
    }
}

/// An entry with its position and accounting resolved
#[derive(Debug, Clone, Copy)]
pub(crate) struct Planned {
    pub entry: Entry,
    pub link_index: u8,
    pub weight: u16,
}

impl Planned {
    pub(crate) fn user_data(&self) -> u64 {
        u64::from(self.entry.tag)
            | (u64::from(self.link_index) << INDEX_SHIFT)
            | (u64::from(self.weight) << WEIGHT_SHIFT)
    }

    pub(crate) fn completion(&self, result: i32) -> Completion {
        Completion::new(self.entry.tag, result, self.link_index, self.weight)
    }

    /// Whether a result must be delivered for this entry
    pub(crate) fn reports(&self, result: i32) -> bool {
        !self.entry.skip_success || breaks_link(&self.entry.op, result)
    }
}

/// Resolve link positions and completion weights for a batch
///
/// Every entry of a chain except the last is linked and skip-success, so a
/// chain reports exactly one completion: either its first failure (which
/// suppresses the rest of the chain) or the result of its last entry. Each
/// entry therefore carries the whole chain length as its weight.
pub(crate) fn plan(entries: &[Entry]) -> Result<Vec<Planned>> {
    if entries.is_empty() {
        return Err(RingError::InvalidChain("empty batch"));
    }
    if entries.last().is_some_and(|e| e.linked || e.skip_success) {
        return Err(RingError::InvalidChain("batch ends inside a chain"));
    }

    let mut planned = Vec::with_capacity(entries.len());
    let mut chain_start = 0;
    for (i, entry) in entries.iter().enumerate() {
        if entry.skip_success != entry.linked {
            return Err(RingError::InvalidChain(
                "linked entries must be skip-success and vice versa",
            ));
        }
        if entry.linked {
            continue;
        }
        let chain = &entries[chain_start..=i];
        let weight = u16::try_from(chain.len())
            .ok()
            .filter(|&w| w <= u16::from(u8::MAX) + 1)
            .ok_or(RingError::InvalidChain("chain too long"))?;
        for (link_index, entry) in chain.iter().enumerate() {
            planned.push(Planned {
                entry: *entry,
                link_index: link_index as u8,
                weight,
            });
        }
        chain_start = i + 1;
    }
    Ok(planned)
}

/// Whether a result breaks its link chain
///
/// Transfers shorter than requested count as failures.
pub(crate) fn breaks_link(op: &Op, result: i32) -> bool {
    match op.transfer_len() {
        Some(len) => result < 0 || (result as u32) < len,
        None => result < 0,
    }
}
