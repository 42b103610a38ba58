//! io_uring backend
//!
//! Regular files are opened straight into the registered file table, and
//! all reads, writes and closes on them address the table through
//! `types::Fixed`. Mainline kernels have no directory-read opcode, so a
//! directory chain (`OpenDir` then `GetDents`) is split: the open goes
//! through the ring as a plain `openat`, its descriptor is parked under the
//! directory's slot number, and each `GetDents` on that slot runs as a
//! direct `getdents64` whose result is posted as if the ring produced it.
//!
//! Those directory reads and closes are the only calls on the loop thread
//! that block outside [`Ring::wait_for_completions`]. Everything else the
//! engine does waits on the ring alone.

use crate::completions::CompletionQueue;
use crate::error::{Result, RingError};
use crate::op::{plan, Completion, Entry, FixedSlot, Op, Planned, INTERNAL_FLAG};
use crate::sys;
use crate::{Ring, RingConfig};
use io_uring::{opcode, squeue, types, IoUring};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Longest a dropped ring waits for the kernel to finish outstanding work
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A directory open travelling through the ring, with the rest of its chain
#[derive(Debug)]
struct DirOpen {
    open: Planned,
    rest: Vec<Planned>,
}

/// Ring backend driving a kernel io_uring instance
pub struct KernelRing {
    ring: IoUring,
    queue: CompletionQueue,
    fixed_files: u32,
    dir_fds: HashMap<FixedSlot, OwnedFd>,
    dir_opens: HashMap<u64, DirOpen>,
    next_internal: u64,
    emulated: Vec<Planned>,
}

impl std::fmt::Debug for KernelRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRing")
            .field("depth", &self.queue.depth())
            .field("in_flight", &self.queue.in_flight())
            .field("fixed_files", &self.fixed_files)
            .field("open_dirs", &self.dir_fds.len())
            .finish_non_exhaustive()
    }
}

impl KernelRing {
    /// Create a ring and register a sparse file table
    ///
    /// SQPOLL is attempted when requested and silently dropped if the
    /// kernel refuses it (it usually needs privileges).
    ///
    /// # Errors
    ///
    /// - [`RingError::Io`] if the ring cannot be created
    /// - [`RingError::Unsupported`] if the file table cannot be registered
    pub fn new(config: &RingConfig) -> Result<Self> {
        let ring = build_ring(config)?;
        ring.submitter()
            .register_files_sparse(config.fixed_files)
            .map_err(|e| {
                RingError::Unsupported(format!(
                    "cannot register {} fixed files: {e}",
                    config.fixed_files
                ))
            })?;
        debug!(
            depth = config.depth,
            fixed_files = config.fixed_files,
            "io_uring ready"
        );
        Ok(Self {
            ring,
            queue: CompletionQueue::new(config.depth as usize),
            fixed_files: config.fixed_files,
            dir_fds: HashMap::new(),
            dir_opens: HashMap::new(),
            next_internal: 0,
            emulated: Vec::new(),
        })
    }

    fn check_slots(&self, entries: &[Entry]) -> Result<()> {
        for slot in entries.iter().filter_map(|e| e.op().slot()) {
            if slot >= self.fixed_files {
                return Err(RingError::InvalidSlot {
                    slot,
                    capacity: self.fixed_files,
                });
            }
        }
        Ok(())
    }

    fn is_emulated(&self, chain: &[Planned]) -> bool {
        match chain.first().map(|p| p.entry.op()) {
            Some(Op::OpenDir { .. } | Op::GetDents { .. }) => true,
            Some(Op::Close { slot }) => chain.len() == 1 && self.dir_fds.contains_key(slot),
            _ => false,
        }
    }

    /// Run a directory operation outside the ring
    ///
    /// # Safety
    ///
    /// Pointers inside `op` must satisfy the contract of [`Ring::push`].
    unsafe fn execute(&mut self, op: &Op) -> i32 {
        match *op {
            Op::GetDents { slot, buf, len } => match self.dir_fds.get(&slot) {
                Some(fd) => sys::getdents64(fd.as_raw_fd(), buf, len),
                None => -libc::EBADF,
            },
            Op::Close { slot } => match self.dir_fds.remove(&slot) {
                Some(_) => 0,
                None => -libc::EBADF,
            },
            _ => -libc::EINVAL,
        }
    }

    /// Execute an emulated chain, stopping at the first reported failure
    fn run_chain(&mut self, chain: &[Planned]) {
        for planned in chain {
            // SAFETY: the pointers were handed to push() whose caller keeps
            // them alive until the completion is acknowledged.
            let result = unsafe { self.execute(planned.entry.op()) };
            trace!(op = planned.entry.op().name(), result, "emulated");
            if planned.reports(result) {
                self.queue.post(planned.completion(result));
                if planned.entry.is_linked() {
                    break;
                }
            }
        }
    }

    fn finish_dir_open(&mut self, token: u64, result: i32) {
        let Some(DirOpen { open, rest }) = self.dir_opens.remove(&token) else {
            warn!(token, "completion for unknown directory open");
            return;
        };
        if result < 0 {
            // The failure retires the whole chain; the rest never runs.
            self.queue.post(open.completion(result));
            return;
        }
        if let Op::OpenDir { slot, .. } = *open.entry.op() {
            // SAFETY: a successful openat returns a descriptor we own.
            let fd = unsafe { OwnedFd::from_raw_fd(result) };
            self.dir_fds.insert(slot, fd);
        }
        if open.reports(0) {
            self.queue.post(open.completion(0));
        }
        self.run_chain(&rest);
    }

    /// Move kernel completions into the ready queue
    fn reap(&mut self) {
        let mut finished = Vec::new();
        for cqe in self.ring.completion() {
            let user_data = cqe.user_data();
            if user_data & INTERNAL_FLAG != 0 {
                finished.push((user_data, cqe.result()));
            } else {
                self.queue
                    .post(Completion::from_user_data(user_data, cqe.result()));
            }
        }
        for (token, result) in finished {
            self.finish_dir_open(token, result);
        }
    }

    fn sqe_for(&self, planned: &Planned) -> Result<squeue::Entry> {
        let at_cwd = types::Fd(libc::AT_FDCWD);
        let sqe = match *planned.entry.op() {
            Op::MkDir { path, mode } => opcode::MkDirAt::new(at_cwd, path).mode(mode).build(),
            Op::Statx {
                path,
                flags,
                mask,
                buf,
            } => opcode::Statx::new(at_cwd, path, buf.cast())
                .flags(flags)
                .mask(mask)
                .build(),
            Op::Open {
                path,
                flags,
                mode,
                slot,
            } => {
                let dest = types::DestinationSlot::try_from_slot_target(slot)
                    .map_err(|_| RingError::InvalidSlot {
                        slot,
                        capacity: self.fixed_files,
                    })?;
                opcode::OpenAt::new(at_cwd, path)
                    .flags(slot_open_flags(flags))
                    .mode(mode)
                    .file_index(Some(dest))
                    .build()
            }
            Op::Read {
                slot,
                buf,
                len,
                offset,
            } => opcode::Read::new(types::Fixed(slot), buf, len)
                .offset(offset)
                .build(),
            Op::Write {
                slot,
                buf,
                len,
                offset,
            } => opcode::Write::new(types::Fixed(slot), buf, len)
                .offset(offset)
                .build(),
            Op::Close { slot } => opcode::Close::new(types::Fixed(slot)).build(),
            Op::OpenDir { .. } | Op::GetDents { .. } => {
                return Err(RingError::Unsupported(format!(
                    "{} cannot be linked with ring operations",
                    planned.entry.op().name()
                )))
            }
        };

        let mut flags = squeue::Flags::empty();
        if planned.entry.is_linked() {
            flags |= squeue::Flags::IO_LINK;
        }
        if planned.entry.is_skip_success() {
            flags |= squeue::Flags::SKIP_SUCCESS;
        }
        Ok(sqe.flags(flags).user_data(planned.user_data()))
    }
}

/// Flags for an open installed straight into the file table
///
/// Direct descriptors have no close-on-exec state and the kernel rejects
/// `O_CLOEXEC` on such opens with `EINVAL`.
fn slot_open_flags(flags: i32) -> i32 {
    flags & !libc::O_CLOEXEC
}

/// Plain `openat` for a directory whose completion the backend consumes
fn dir_open_sqe(path: *const libc::c_char, token: u64) -> squeue::Entry {
    opcode::OpenAt::new(types::Fd(libc::AT_FDCWD), path)
        .flags(sys::DIR_OPEN_FLAGS)
        .build()
        .user_data(token)
}

fn build_ring(config: &RingConfig) -> Result<IoUring> {
    if let Some(idle) = config.sqpoll_idle {
        let mut builder = IoUring::builder();
        builder.setup_sqpoll(idle);
        match builder.build(config.depth) {
            Ok(ring) => return Ok(ring),
            Err(e) => warn!("SQPOLL unavailable, using a plain ring: {}", e),
        }
    }
    Ok(IoUring::new(config.depth)?)
}

/// Split a planned batch into its link chains
fn chains(planned: Vec<Planned>) -> Vec<Vec<Planned>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for p in planned {
        let linked = p.entry.is_linked();
        current.push(p);
        if !linked {
            out.push(std::mem::take(&mut current));
        }
    }
    out
}

impl Ring for KernelRing {
    fn depth(&self) -> usize {
        self.queue.depth()
    }

    fn fixed_slots(&self) -> u32 {
        self.fixed_files
    }

    fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    unsafe fn push(&mut self, entries: &[Entry]) -> Result<()> {
        let planned = plan(entries)?;
        self.check_slots(entries)?;

        let mut sqes = Vec::with_capacity(entries.len());
        let mut dir_opens = Vec::new();
        let mut emulated = Vec::new();
        for chain in chains(planned) {
            if !self.is_emulated(&chain) {
                for p in &chain {
                    sqes.push(self.sqe_for(p)?);
                }
                continue;
            }
            let mut rest = chain.into_iter();
            let Some(head) = rest.next() else { continue };
            if let Op::OpenDir { path, .. } = *head.entry.op() {
                let token = INTERNAL_FLAG | self.next_internal;
                self.next_internal = (self.next_internal + 1) & !INTERNAL_FLAG;
                sqes.push(dir_open_sqe(path, token));
                dir_opens.push((
                    token,
                    DirOpen {
                        open: head,
                        rest: rest.collect(),
                    },
                ));
            } else {
                emulated.push(head);
                emulated.extend(rest);
            }
        }

        self.queue.reserve(entries.len())?;
        let mut sq = self.ring.submission();
        if sq.push_multiple(&sqes).is_err() {
            let available = sq.capacity() - sq.len();
            drop(sq);
            self.queue.unreserve(entries.len());
            return Err(RingError::RingFull {
                requested: sqes.len(),
                available,
            });
        }
        drop(sq);
        self.dir_opens.extend(dir_opens);
        self.emulated.extend(emulated);
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        let submitted = self.ring.submit()?;
        let emulated = std::mem::take(&mut self.emulated);
        let count = emulated.len();
        for chain in chains(emulated) {
            self.run_chain(&chain);
        }
        Ok(submitted + count)
    }

    fn wait_for_completions(&mut self, count: usize, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.reap();
            if self.queue.ready_len() >= count {
                return Ok(());
            }

            let waited = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(RingError::Timeout);
                    }
                    let ts = types::Timespec::new()
                        .sec(left.as_secs())
                        .nsec(left.subsec_nanos());
                    let args = types::SubmitArgs::new().timespec(&ts);
                    self.ring.submitter().submit_with_args(1, &args)
                }
                None => self.ring.submit_and_wait(1),
            };

            match waited {
                Ok(_) => {}
                Err(e) if e.raw_os_error() == Some(libc::ETIME) => {
                    self.reap();
                    if self.queue.ready_len() >= count {
                        return Ok(());
                    }
                    return Err(RingError::Timeout);
                }
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => continue,
                Err(e) => return Err(RingError::Io(e)),
            }
        }
    }

    fn peek_completion(&mut self) -> Option<Completion> {
        if self.queue.ready_len() == 0 {
            self.reap();
        }
        self.queue.front()
    }

    fn acknowledge(&mut self, completion: &Completion) {
        self.queue.acknowledge(completion);
    }

    fn acknowledge_n(&mut self, count: usize) {
        self.queue.acknowledge_n(count);
    }
}

impl Drop for KernelRing {
    /// Wait until the kernel no longer touches caller memory
    fn drop(&mut self) {
        if self.queue.in_flight() == 0 {
            return;
        }
        debug!(in_flight = self.queue.in_flight(), "draining ring before drop");
        if let Err(e) = Ring::submit(self) {
            warn!("submit while draining ring failed: {}", e);
        }
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.queue.in_flight() > 0 {
            let ready = self.queue.ready_len();
            if ready > 0 {
                self.queue.acknowledge_n(ready);
                continue;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() || self.wait_for_completions(1, Some(left)).is_err() {
                warn!(
                    in_flight = self.queue.in_flight(),
                    "ring dropped with operations still in flight"
                );
                break;
            }
        }
    }
}
