//! Decoding of `getdents64` output
//!
//! The kernel fills the buffer with back-to-back `linux_dirent64` records:
//!
//! ```text
//! offset  size  field
//!      0     8  d_ino
//!      8     8  d_off
//!     16     2  d_reclen   (total record length, padded)
//!     18     1  d_type
//!     19     -  d_name     (NUL-terminated)
//! ```
//!
//! Records are walked by `d_reclen` strides. The decoder works on a byte
//! slice and never trusts a length it has not bounds-checked.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

/// Size of the fixed part of a record
pub const HEADER_LEN: usize = 19;

/// File type reported by the directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
    /// The filesystem does not fill `d_type`
    Unknown,
    /// Symlink, device, fifo, socket
    Other(u8),
}

impl From<u8> for EntryType {
    fn from(d_type: u8) -> Self {
        match d_type {
            libc::DT_REG => EntryType::Regular,
            libc::DT_DIR => EntryType::Directory,
            libc::DT_UNKNOWN => EntryType::Unknown,
            other => EntryType::Other(other),
        }
    }
}

/// One decoded record, borrowing its name from the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'a> {
    pub ino: u64,
    pub kind: EntryType,
    name: &'a [u8],
}

impl<'a> DirEntry<'a> {
    /// Name without the terminating NUL
    #[must_use]
    pub fn name(&self) -> &'a OsStr {
        OsStr::from_bytes(self.name)
    }

    /// `.` or `..`
    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

/// A record that cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Malformed {
    /// Byte offset of the record
    pub offset: usize,
    pub reason: &'static str,
}

/// Iterator over the records of one `getdents64` result
///
/// Yields `Err` once for the first malformed record and then stops.
#[derive(Debug)]
pub struct Dirents<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Dirents<'a> {
    /// Walk the first `len` bytes of a directory read
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn decode(&self) -> Result<(DirEntry<'a>, usize), &'static str> {
        let rest = &self.buf[self.pos..];
        if rest.len() < HEADER_LEN {
            return Err("truncated record header");
        }
        let reclen = usize::from(u16::from_ne_bytes([rest[16], rest[17]]));
        if reclen == 0 {
            return Err("zero record length");
        }
        if reclen <= HEADER_LEN {
            return Err("record length shorter than header");
        }
        if reclen > rest.len() {
            return Err("record length overruns buffer");
        }
        let mut ino = [0u8; 8];
        ino.copy_from_slice(&rest[..8]);
        let name_field = &rest[HEADER_LEN..reclen];
        let nul = name_field
            .iter()
            .position(|&b| b == 0)
            .ok_or("name not NUL-terminated")?;
        if nul == 0 {
            return Err("empty name");
        }
        Ok((
            DirEntry {
                ino: u64::from_ne_bytes(ino),
                kind: EntryType::from(rest[18]),
                name: &name_field[..nul],
            },
            reclen,
        ))
    }
}

impl<'a> Iterator for Dirents<'a> {
    type Item = Result<DirEntry<'a>, Malformed>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        match self.decode() {
            Ok((entry, reclen)) => {
                self.pos += reclen;
                Some(Ok(entry))
            }
            Err(reason) => {
                let offset = self.pos;
                self.pos = self.buf.len();
                Some(Err(Malformed { offset, reason }))
            }
        }
    }
}
