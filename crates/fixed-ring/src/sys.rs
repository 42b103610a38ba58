//! Direct system calls shared by the backends
//!
//! Every function returns the raw result convention of a ring completion:
//! a non-negative value on success, `-errno` on failure.

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

fn last_errno() -> i32 {
    -std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}

fn cvt(ret: libc::c_long) -> i32 {
    if ret < 0 {
        last_errno()
    } else {
        ret as i32
    }
}

/// Flags used for every directory handle
pub(crate) const DIR_OPEN_FLAGS: i32 = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;

/// Read directory entries into `buf`
///
/// # Safety
///
/// `buf` must be valid for writes of `len` bytes.
pub(crate) unsafe fn getdents64(fd: RawFd, buf: *mut u8, len: u32) -> i32 {
    cvt(libc::syscall(
        libc::SYS_getdents64,
        fd as libc::c_long,
        buf as libc::c_long,
        len as libc::c_long,
    ))
}

/// Open `path` and wrap the descriptor
///
/// # Safety
///
/// `path` must point to a NUL-terminated string.
pub(crate) unsafe fn open(
    path: *const libc::c_char,
    flags: i32,
    mode: libc::mode_t,
) -> Result<OwnedFd, i32> {
    let fd = libc::openat(libc::AT_FDCWD, path, flags | libc::O_CLOEXEC, mode);
    if fd < 0 {
        Err(last_errno())
    } else {
        Ok(OwnedFd::from_raw_fd(fd))
    }
}

/// # Safety
///
/// `path` must point to a NUL-terminated string.
pub(crate) unsafe fn mkdir(path: *const libc::c_char, mode: libc::mode_t) -> i32 {
    cvt(libc::c_long::from(libc::mkdirat(libc::AT_FDCWD, path, mode)))
}

/// # Safety
///
/// `path` must be NUL-terminated and `buf` valid for one `statx` record.
pub(crate) unsafe fn statx(
    path: *const libc::c_char,
    flags: i32,
    mask: u32,
    buf: *mut libc::statx,
) -> i32 {
    cvt(libc::c_long::from(libc::statx(
        libc::AT_FDCWD,
        path,
        flags,
        mask,
        buf,
    )))
}

/// # Safety
///
/// `buf` must be valid for writes of `len` bytes.
pub(crate) unsafe fn pread(fd: RawFd, buf: *mut u8, len: u32, offset: u64) -> i32 {
    cvt(libc::pread(fd, buf.cast(), len as usize, offset as libc::off_t) as libc::c_long)
}

/// # Safety
///
/// `buf` must be valid for reads of `len` bytes.
pub(crate) unsafe fn pwrite(fd: RawFd, buf: *const u8, len: u32, offset: u64) -> i32 {
    cvt(libc::pwrite(fd, buf.cast(), len as usize, offset as libc::off_t) as libc::c_long)
}
