//! The copy engine and its event loop
//!
//! One [`Engine`] owns the ring, every job, every resource pool and every
//! work queue. It runs on a single thread; the only place it blocks is
//! [`Ring::wait_for_completions`]. Each loop iteration:
//!
//! 1. schedules as much queued work as the ring, slot and buffer budgets
//!    allow ([`scheduler`](crate::scheduler), [`traversal`](crate::traversal))
//! 2. submits it
//! 3. waits for at least one completion, bounded by the idle timeout
//! 4. dispatches every ready completion ([`dispatch`](crate::dispatch))
//!
//! Dispatch never submits. It only mutates jobs and queues work, so it is
//! safe to drain completions from inside a scheduling pass when a budget
//! runs out.

use crate::buffer::{AlignedBuffer, BufferPool, PooledBuffer};
use crate::config::CopyConfig;
use crate::copy::CopyStats;
use crate::error::{CopyError, Result};
use crate::job::{CopyJob, DirectoryJob, Origin};
use crate::pending::PendingOp;
use crate::slots::SlotAllocator;
use crate::table::{DirId, IdTable, JobId, OpId, TableId};
use crate::traversal::CreatedDirs;
use fixed_ring::{Entry, Ring, RingError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Work waiting for a destination directory to be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parked {
    /// Copy job ready to open
    File(JobId),
    /// Directory whose mkdir may be submitted
    Dir(DirId),
}

/// Work queues, one per kind of submission
#[derive(Debug, Default)]
pub(crate) struct Queues {
    pub mkdir: VecDeque<DirId>,
    pub scan: VecDeque<DirId>,
    pub rescan: VecDeque<DirId>,
    pub close_dir: VecDeque<DirId>,
    pub stat: VecDeque<JobId>,
    pub open: VecDeque<JobId>,
    pub transfer: VecDeque<JobId>,
    pub close: VecDeque<JobId>,
}

/// Single-threaded tree copier driving one ring
pub struct Engine<R: Ring> {
    // Dropped first: no kernel operation may outlive the memory below.
    pub(crate) ring: R,
    pub(crate) config: CopyConfig,
    pub(crate) slots: SlotAllocator,
    pub(crate) buffers: BufferPool,
    /// Buffers of completed writes awaiting bulk reclaim
    pub(crate) retired: Vec<PooledBuffer>,
    pub(crate) pending: IdTable<OpId, PendingOp>,
    pub(crate) files: IdTable<JobId, CopyJob>,
    pub(crate) dirs: IdTable<DirId, DirectoryJob>,
    pub(crate) created: CreatedDirs,
    pub(crate) parked: HashMap<PathBuf, Vec<Parked>>,
    pub(crate) queues: Queues,
    /// Recycled directory-entry buffers
    pub(crate) dir_buffers: Vec<AlignedBuffer>,
    pub(crate) active_scans: usize,
    pub(crate) stats: CopyStats,
    scratch: Vec<Entry>,
}

impl<R: Ring> std::fmt::Debug for Engine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("in_flight", &self.ring.in_flight())
            .field("pending", &self.pending.len())
            .field("files", &self.files.len())
            .field("dirs", &self.dirs.len())
            .field("busy_slots", &self.slots.busy())
            .field("buffers_out", &self.buffers.outstanding())
            .finish_non_exhaustive()
    }
}

impl<R: Ring> Engine<R> {
    /// Build an engine around `ring`
    ///
    /// The slot allocator covers the smaller of the configured fixed-file
    /// count and the ring's registered table.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the buffer pool
    /// cannot be allocated.
    pub fn new(ring: R, config: CopyConfig) -> Result<Self> {
        config.validate()?;
        let slot_count = config.fixed_files.min(ring.fixed_slots());
        if slot_count < 2 {
            return Err(CopyError::InvalidConfig(format!(
                "ring provides {slot_count} fixed slots, at least 2 are needed"
            )));
        }
        let buffers = BufferPool::new(config.buffer_count, config.buffer_size)?;
        Ok(Self {
            ring,
            slots: SlotAllocator::new(slot_count),
            buffers,
            retired: Vec::with_capacity(config.buffer_count),
            pending: IdTable::new(),
            files: IdTable::new(),
            dirs: IdTable::new(),
            created: CreatedDirs::default(),
            parked: HashMap::new(),
            queues: Queues::default(),
            dir_buffers: Vec::new(),
            active_scans: 0,
            stats: CopyStats::default(),
            scratch: Vec::with_capacity(4),
            config,
        })
    }

    /// Mark a destination directory as already existing
    pub fn seed_created(&mut self, dir: &Path) {
        self.created.insert(dir.to_path_buf());
    }

    /// Queue a directory tree: `dst` becomes a copy of `src`
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidPath`] for paths containing NUL bytes.
    pub fn add_tree(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.add_directory(src.to_path_buf(), dst.to_path_buf())?;
        Ok(())
    }

    /// Queue a single regular file
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidPath`] for paths containing NUL bytes.
    pub fn add_file(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.add_copy_job(src.to_path_buf(), dst.to_path_buf(), Origin::Root)?;
        Ok(())
    }

    /// Copy jobs plus directory jobs still alive
    #[must_use]
    pub fn jobs(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> &CopyStats {
        &self.stats
    }

    /// Borrow the ring
    #[must_use]
    pub fn ring(&self) -> &R {
        &self.ring
    }

    /// Run until every queued job is finished
    ///
    /// # Errors
    ///
    /// Any failed operation, malformed directory data or ring failure ends
    /// the run with the corresponding [`CopyError`]. A wait that times out
    /// while jobs remain and nothing is in flight fails with
    /// [`CopyError::Stalled`].
    pub fn run(&mut self) -> Result<CopyStats> {
        let start = Instant::now();
        info!(
            files = self.files.len(),
            dirs = self.dirs.len(),
            "starting copy"
        );
        loop {
            self.schedule()?;
            let submitted = self.ring.submit()?;
            trace!(submitted, in_flight = self.ring.in_flight(), "submitted");

            if self.is_finished() {
                break;
            }

            match self
                .ring
                .wait_for_completions(1, Some(self.config.idle_timeout))
            {
                Ok(()) => {}
                Err(RingError::Timeout) if self.ring.in_flight() > 0 => {
                    debug!(
                        in_flight = self.ring.in_flight(),
                        "no completion within idle timeout, waiting again"
                    );
                    continue;
                }
                Err(RingError::Timeout) => {
                    return Err(CopyError::Stalled { jobs: self.jobs() });
                }
                Err(e) => return Err(e.into()),
            }
            self.drain_ready()?;
        }

        self.stats.duration = start.elapsed();
        self.stats.peak_busy_slots = self.slots.peak_busy();
        self.stats.peak_buffers = self.buffers.peak_outstanding();
        info!(
            files = self.stats.files_copied,
            bytes = self.stats.bytes_copied,
            dirs = self.stats.directories_created,
            skipped = self.stats.entries_skipped,
            "copy finished in {:?}",
            self.stats.duration
        );
        Ok(self.stats.clone())
    }

    fn is_finished(&self) -> bool {
        self.files.is_empty()
            && self.dirs.is_empty()
            && self.pending.is_empty()
            && self.ring.in_flight() == 0
    }

    /// Dispatch every completion that is ready, without blocking
    pub(crate) fn drain_ready(&mut self) -> Result<usize> {
        let mut drained = 0;
        while let Some(completion) = self.ring.peek_completion() {
            self.dispatch(completion)?;
            self.ring.acknowledge(&completion);
            drained += 1;
        }
        Ok(drained)
    }

    /// Register `op` and push its entries
    ///
    /// Callers check [`Ring::available`] first, so a full ring here is a
    /// bookkeeping bug rather than backpressure.
    pub(crate) fn enqueue(&mut self, op: PendingOp) -> Result<OpId> {
        let id = self.pending.insert(op);
        self.scratch.clear();
        if let Some(record) = self.pending.get_mut(id) {
            record.entries(id.index(), &mut self.scratch);
        }
        trace!(
            tag = id.index(),
            op = self.scratch.first().map(|e| e.op().name()),
            entries = self.scratch.len(),
            "push"
        );
        // SAFETY: every pointer in the entries refers to heap memory owned
        // by the record, which stays in `pending` until its final
        // completion is dispatched. The ring is dropped before `pending`.
        let pushed = unsafe { self.ring.push(&self.scratch) };
        if let Err(e) = pushed {
            self.pending.remove(id);
            return Err(e.into());
        }
        self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.ring.in_flight());
        Ok(id)
    }

    /// Create a copy job in `StatPending` and queue its stat
    pub(crate) fn add_copy_job(&mut self, src: PathBuf, dst: PathBuf, origin: Origin) -> Result<JobId> {
        let job = self.files.insert(CopyJob::new(src, dst, origin)?);
        self.queues.stat.push_back(job);
        Ok(job)
    }
}
