//! Copy jobs and directory jobs
//!
//! A [`CopyJob`] walks a strictly forward state machine:
//!
//! ```text
//! StatPending -> StatSubmitted -> StatDone -> CopyInProgress -> CopyDone
//! ```
//!
//! `bytes_submitted` counts bytes handed to the ring in chunks, while
//! `bytes_copied` counts bytes whose write completion has been seen. Only
//! the acknowledged counter decides completion.

use crate::error::{CopyError, Result};
use crate::buffer::AlignedBuffer;
use fixed_ring::FixedSlot;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Convert a path for the kernel
///
/// # Errors
///
/// Returns [`CopyError::InvalidPath`] if the path contains a NUL byte.
pub fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| CopyError::InvalidPath(path.display().to_string()))
}

/// Where a copy job came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The copy root itself; its stat follows symlinks
    Root,
    /// Directory entry typed as a regular file
    Regular,
    /// Directory entry with unknown type; the stat decides what it is
    Unclassified,
}

/// Copy job state, in the only order it may be traversed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CopyState {
    StatPending,
    StatSubmitted,
    StatDone,
    CopyInProgress,
    CopyDone,
}

impl CopyState {
    fn name(self) -> &'static str {
        match self {
            CopyState::StatPending => "StatPending",
            CopyState::StatSubmitted => "StatSubmitted",
            CopyState::StatDone => "StatDone",
            CopyState::CopyInProgress => "CopyInProgress",
            CopyState::CopyDone => "CopyDone",
        }
    }
}

/// One regular file being copied
#[derive(Debug)]
pub struct CopyJob {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub src_c: CString,
    pub dst_c: CString,
    pub origin: Origin,
    state: CopyState,
    size: Option<u64>,
    bytes_submitted: u64,
    bytes_copied: u64,
    pub src_slot: Option<FixedSlot>,
    pub dst_slot: Option<FixedSlot>,
    pub src_open: bool,
    pub dst_open: bool,
    /// Chunks handed to the ring whose write has not completed
    pub chunks_in_flight: usize,
    /// Whether the job sits in the transfer queue
    pub queued: bool,
}

impl CopyJob {
    /// Create a job in `StatPending`
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidPath`] if either path contains a NUL byte.
    pub fn new(src: PathBuf, dst: PathBuf, origin: Origin) -> Result<Self> {
        Ok(Self {
            src_c: c_path(&src)?,
            dst_c: c_path(&dst)?,
            src,
            dst,
            origin,
            state: CopyState::StatPending,
            size: None,
            bytes_submitted: 0,
            bytes_copied: 0,
            src_slot: None,
            dst_slot: None,
            src_open: false,
            dst_open: false,
            chunks_in_flight: 0,
            queued: false,
        })
    }

    #[must_use]
    pub fn state(&self) -> CopyState {
        self.state
    }

    /// Destination directory that must exist before the file is opened
    #[must_use]
    pub fn dest_dir(&self) -> Option<&Path> {
        self.dst.parent()
    }

    /// Move to the next state
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidTransition`] unless `to` immediately
    /// follows the current state, except that a job may go from
    /// `CopyInProgress` to `CopyDone` only once every byte is acknowledged.
    pub fn advance(&mut self, to: CopyState) -> Result<()> {
        let next = match self.state {
            CopyState::StatPending => Some(CopyState::StatSubmitted),
            CopyState::StatSubmitted => Some(CopyState::StatDone),
            CopyState::StatDone => Some(CopyState::CopyInProgress),
            CopyState::CopyInProgress if self.is_fully_copied() => Some(CopyState::CopyDone),
            CopyState::CopyInProgress | CopyState::CopyDone => None,
        };
        if next != Some(to) {
            return Err(CopyError::InvalidTransition {
                path: self.src.clone(),
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Record the size reported by the stat; may only happen once
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::Internal`] if the size was already set.
    pub fn set_size(&mut self, size: u64) -> Result<()> {
        if self.size.is_some() {
            return Err(CopyError::Internal(format!(
                "size of {} set twice",
                self.src.display()
            )));
        }
        self.size = Some(size);
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    #[must_use]
    pub fn bytes_submitted(&self) -> u64 {
        self.bytes_submitted
    }

    #[must_use]
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }

    /// Whether both descriptors are open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.src_open && self.dst_open
    }

    /// Whether bytes remain to be handed to the ring
    #[must_use]
    pub fn has_unsubmitted(&self) -> bool {
        self.size.is_some_and(|size| self.bytes_submitted < size)
    }

    /// Claim the next chunk: `(offset, len)`, at most `chunk` bytes
    pub fn next_chunk(&mut self, chunk: usize) -> Option<(u64, u32)> {
        let size = self.size?;
        let remaining = size.checked_sub(self.bytes_submitted).filter(|r| *r > 0)?;
        let len = remaining.min(chunk as u64) as u32;
        let offset = self.bytes_submitted;
        self.bytes_submitted += u64::from(len);
        self.chunks_in_flight += 1;
        Some((offset, len))
    }

    /// Account one completed write
    pub fn record_write(&mut self, written: u32) {
        self.bytes_copied += u64::from(written);
        self.chunks_in_flight = self.chunks_in_flight.saturating_sub(1);
        debug_assert!(self.bytes_copied <= self.bytes_submitted);
    }

    /// Whether every byte has been acknowledged
    #[must_use]
    pub fn is_fully_copied(&self) -> bool {
        self.size == Some(self.bytes_copied)
    }
}

/// Progress of a directory's source-side scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Waiting for a scan slot
    Queued,
    /// Handle open, reads in progress
    Scanning,
    /// End of directory seen, close pending
    Closing,
    /// Handle closed
    Closed,
}

/// One directory being copied
#[derive(Debug)]
pub struct DirectoryJob {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub src_c: CString,
    pub dst_c: CString,
    pub slot: Option<FixedSlot>,
    /// Entry buffer while no read is in flight
    pub buf: Option<AlignedBuffer>,
    pub scan: ScanState,
    pub mkdir_done: bool,
}

impl DirectoryJob {
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidPath`] if either path contains a NUL byte.
    pub fn new(src: PathBuf, dst: PathBuf) -> Result<Self> {
        Ok(Self {
            src_c: c_path(&src)?,
            dst_c: c_path(&dst)?,
            src,
            dst,
            slot: None,
            buf: None,
            scan: ScanState::Queued,
            mkdir_done: false,
        })
    }

    /// Whether nothing more will happen for this directory
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.mkdir_done && self.scan == ScanState::Closed
    }
}
