//! Descriptor limit handling
//!
//! A registered file table of N slots can hold N open descriptors, and each
//! of them counts against `RLIMIT_NOFILE` the moment the kernel installs it.
//! Before a run the soft limit is raised far enough to cover the slots plus
//! the handful of descriptors the process already needs.

use tracing::{info, warn};

/// Descriptors reserved for stdio, the ring itself and the test harness
pub const FD_HEADROOM: u64 = 64;

/// Soft and hard `RLIMIT_NOFILE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdLimits {
    pub soft: u64,
    pub hard: u64,
}

/// Read the current descriptor limits
///
/// # Errors
///
/// Returns an error if the getrlimit system call fails
pub fn fd_limits() -> std::io::Result<FdLimits> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the rlimit we own.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(FdLimits {
        soft: limit.rlim_cur,
        hard: limit.rlim_max,
    })
}

fn set_soft_limit(limits: FdLimits, soft: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft,
        rlim_max: limits.hard,
    };
    // SAFETY: setrlimit only reads the rlimit we pass.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Soft limit needed for `slots` registered descriptors
#[must_use]
pub fn required_soft_limit(slots: u32) -> u64 {
    u64::from(slots) + FD_HEADROOM
}

/// Largest slot count a soft limit of `soft` can carry
#[must_use]
pub fn slots_within(soft: u64) -> u32 {
    u32::try_from(soft.saturating_sub(FD_HEADROOM)).unwrap_or(u32::MAX)
}

/// Make sure `slots` descriptors can be open at once, returning the slot
/// count that actually fits
///
/// Raises the soft limit toward the hard limit if needed. When even the
/// hard limit is too low, logs a warning and returns a clamped count
/// (never below 2). If the limits cannot be read the request is returned
/// unchanged.
#[must_use]
pub fn ensure_fd_capacity(slots: u32) -> u32 {
    let limits = match fd_limits() {
        Ok(limits) => limits,
        Err(e) => {
            warn!("Could not read file descriptor limit: {}", e);
            return slots;
        }
    };
    let needed = required_soft_limit(slots);
    if limits.soft >= needed {
        info!("File descriptor limit: {} (adequate)", limits.soft);
        return slots;
    }

    let target = needed.min(limits.hard);
    let soft = match set_soft_limit(limits, target) {
        Ok(()) => {
            info!(
                "Raised file descriptor limit from {} to {}",
                limits.soft, target
            );
            target
        }
        Err(e) => {
            warn!("Could not raise file descriptor limit: {}", e);
            limits.soft
        }
    };
    if soft >= needed {
        return slots;
    }

    let clamped = slots_within(soft).max(2);
    warn!(
        "File descriptor limit {} cannot hold {} fixed slots; using {}.\n\
         For large trees consider: ulimit -n {}",
        soft, slots, clamped, needed
    );
    clamped
}
