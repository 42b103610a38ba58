//! Records for operations in flight
//!
//! Each record owns everything the kernel reads or writes while the
//! operation runs (path strings, the stat buffer, the transfer buffer), so
//! the pointers in its ring entries stay valid until the record is removed
//! at dispatch. The record's [`OpId`](crate::table::OpId) is the tag of
//! every entry it produces.

use crate::buffer::{AlignedBuffer, PooledBuffer};
use crate::table::{DirId, JobId};
use fixed_ring::{Entry, FixedSlot, Op};
use std::ffi::CString;

/// Mode for created directories and files (before umask)
pub const CREATE_MODE: libc::mode_t = 0o777;

/// Flags of the destination open
pub const DEST_OPEN_FLAGS: i32 = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;

/// Flags of the source open
pub const SOURCE_OPEN_FLAGS: i32 = libc::O_RDONLY;

/// Fields requested from `statx`
pub const STATX_MASK: u32 = libc::STATX_TYPE | libc::STATX_MODE | libc::STATX_SIZE;

/// A zeroed `statx` record on the heap
#[must_use]
pub fn statx_buffer() -> Box<libc::statx> {
    // SAFETY: statx is plain old data; all-zero is a valid value.
    Box::new(unsafe { std::mem::zeroed() })
}

#[derive(Debug)]
pub enum PendingOp {
    MkDir {
        dir: DirId,
        path: CString,
    },
    /// Optional open of the directory followed by one bulk read
    Scan {
        dir: DirId,
        open: Option<CString>,
        slot: FixedSlot,
        buf: AlignedBuffer,
    },
    CloseDir {
        dir: DirId,
        slot: FixedSlot,
    },
    Stat {
        job: JobId,
        path: CString,
        follow: bool,
        statx: Box<libc::statx>,
    },
    OpenSource {
        job: JobId,
        path: CString,
        slot: FixedSlot,
    },
    OpenDestination {
        job: JobId,
        path: CString,
        slot: FixedSlot,
    },
    /// Linked read then write of one byte range
    Chunk {
        job: JobId,
        src_slot: FixedSlot,
        dst_slot: FixedSlot,
        buf: PooledBuffer,
        offset: u64,
        len: u32,
    },
    /// Linked close of the source then the destination
    CloseFile {
        job: JobId,
        src_slot: FixedSlot,
        dst_slot: FixedSlot,
    },
}

impl PendingOp {
    /// Operation named in logs and errors for the entry at `link_index`
    #[must_use]
    pub fn op_name(&self, link_index: u8) -> &'static str {
        match (self, link_index) {
            (PendingOp::MkDir { .. }, _) => "mkdir",
            (PendingOp::Scan { open: Some(_), .. }, 0) => "opendir",
            (PendingOp::Scan { .. }, _) => "getdents",
            (PendingOp::CloseDir { .. }, _) => "closedir",
            (PendingOp::Stat { .. }, _) => "statx",
            (PendingOp::OpenSource { .. } | PendingOp::OpenDestination { .. }, _) => "open",
            (PendingOp::Chunk { .. }, 0) => "read",
            (PendingOp::Chunk { .. }, _) => "write",
            (PendingOp::CloseFile { .. }, _) => "close",
        }
    }

    /// Number of ring entries the record produces
    #[must_use]
    pub fn entry_count(&self) -> usize {
        usize::from(self.final_link()) + 1
    }

    /// Link index of the entry whose completion ends the record
    #[must_use]
    pub fn final_link(&self) -> u8 {
        match self {
            PendingOp::Scan { open: Some(_), .. }
            | PendingOp::Chunk { .. }
            | PendingOp::CloseFile { .. } => 1,
            _ => 0,
        }
    }

    /// Append the ring entries for this record to `out`
    ///
    /// The pointers point into memory owned by `self`.
    pub fn entries(&mut self, tag: u32, out: &mut Vec<Entry>) {
        match self {
            PendingOp::MkDir { path, .. } => out.push(Entry::new(
                Op::MkDir {
                    path: path.as_ptr(),
                    mode: CREATE_MODE,
                },
                tag,
            )),
            PendingOp::Scan {
                open, slot, buf, ..
            } => {
                if let Some(path) = open {
                    out.push(
                        Entry::new(
                            Op::OpenDir {
                                path: path.as_ptr(),
                                slot: *slot,
                            },
                            tag,
                        )
                        .linked()
                        .skip_success(),
                    );
                }
                out.push(Entry::new(
                    Op::GetDents {
                        slot: *slot,
                        buf: buf.as_mut_ptr(),
                        len: buf.len() as u32,
                    },
                    tag,
                ));
            }
            PendingOp::CloseDir { slot, .. } => {
                out.push(Entry::new(Op::Close { slot: *slot }, tag));
            }
            PendingOp::Stat {
                path,
                follow,
                statx,
                ..
            } => out.push(Entry::new(
                Op::Statx {
                    path: path.as_ptr(),
                    flags: if *follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW },
                    mask: STATX_MASK,
                    buf: &mut **statx,
                },
                tag,
            )),
            PendingOp::OpenSource { path, slot, .. } => out.push(Entry::new(
                Op::Open {
                    path: path.as_ptr(),
                    flags: SOURCE_OPEN_FLAGS,
                    mode: 0,
                    slot: *slot,
                },
                tag,
            )),
            PendingOp::OpenDestination { path, slot, .. } => out.push(Entry::new(
                Op::Open {
                    path: path.as_ptr(),
                    flags: DEST_OPEN_FLAGS,
                    mode: CREATE_MODE,
                    slot: *slot,
                },
                tag,
            )),
            PendingOp::Chunk {
                src_slot,
                dst_slot,
                buf,
                offset,
                len,
                ..
            } => {
                out.push(
                    Entry::new(
                        Op::Read {
                            slot: *src_slot,
                            buf: buf.as_mut_ptr(),
                            len: *len,
                            offset: *offset,
                        },
                        tag,
                    )
                    .linked()
                    .skip_success(),
                );
                out.push(Entry::new(
                    Op::Write {
                        slot: *dst_slot,
                        buf: buf.as_ptr(),
                        len: *len,
                        offset: *offset,
                    },
                    tag,
                ));
            }
            PendingOp::CloseFile {
                src_slot, dst_slot, ..
            } => {
                out.push(
                    Entry::new(Op::Close { slot: *src_slot }, tag)
                        .linked()
                        .skip_success(),
                );
                out.push(Entry::new(Op::Close { slot: *dst_slot }, tag));
            }
        }
    }
}
