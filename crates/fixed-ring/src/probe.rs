//! io_uring feature detection with a process-wide cached answer

use io_uring::{opcode, IoUring, Probe};
use std::ffi::CStr;
use std::sync::OnceLock;
use tracing::debug;

/// Sparse file-table registration and fixed-slot opens need 5.19
const MIN_KERNEL_VERSION: (u32, u32) = (5, 19);

static AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Parse `major.minor` from a uname release string such as `6.8.0-45-generic`
pub(crate) fn parse_kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn kernel_release() -> Option<String> {
    // SAFETY: uname fills a zeroed utsname with NUL-terminated fields.
    unsafe {
        let mut utsname: libc::utsname = std::mem::zeroed();
        if libc::uname(&mut utsname) != 0 {
            return None;
        }
        let release = CStr::from_ptr(utsname.release.as_ptr());
        release.to_str().ok().map(String::from)
    }
}

/// Check whether [`KernelRing`](crate::KernelRing) can run on this host
///
/// Returns `true` if:
/// 1. the kernel is 5.19 or later
/// 2. a ring can be created (io_uring is not blocked by seccomp or sysctl)
/// 3. a sparse file table can be registered
/// 4. every opcode the backend emits is supported
#[must_use]
pub fn is_available() -> bool {
    *AVAILABLE.get_or_init(|| {
        let available = check();
        debug!(available, "io_uring probe");
        available
    })
}

fn check() -> bool {
    let Some(version) = kernel_release().as_deref().and_then(parse_kernel_version) else {
        return false;
    };
    if version < MIN_KERNEL_VERSION {
        return false;
    }

    let Ok(ring) = IoUring::new(4) else {
        return false;
    };
    if ring.submitter().register_files_sparse(4).is_err() {
        return false;
    }

    let mut probe = Probe::new();
    if ring.submitter().register_probe(&mut probe).is_err() {
        return false;
    }
    [
        opcode::MkDirAt::CODE,
        opcode::Statx::CODE,
        opcode::OpenAt::CODE,
        opcode::Read::CODE,
        opcode::Write::CODE,
        opcode::Close::CODE,
    ]
    .into_iter()
    .all(|code| probe.is_supported(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("5.15.0-generic", Some((5, 15)))]
    #[case("6.8.0-45-generic", Some((6, 8)))]
    #[case("5.19", Some((5, 19)))]
    #[case("garbage", None)]
    fn test_parse_kernel_version(#[case] release: &str, #[case] expected: Option<(u32, u32)>) {
        assert_eq!(parse_kernel_version(release), expected);
    }

    #[test]
    fn test_is_available_is_stable() {
        assert_eq!(is_available(), is_available());
    }
}
