//! Copy-job scheduling
//!
//! One pass moves queued work onto the ring in a fixed order: file closes
//! (they free slots), chunk transfers (they free buffers), opens, stats,
//! then directory work. Every phase stops as soon as its budget runs out;
//! what is left waits for the next pass. Running out of slots or buffers
//! first drains whatever completions are already ready, and defers only if
//! that did not help.

use crate::engine::{Engine, Parked};
use crate::error::{CopyError, Result};
use crate::job::{CopyJob, CopyState, Origin};
use crate::pending::{statx_buffer, PendingOp};
use crate::table::JobId;
use fixed_ring::{FixedSlot, Ring};
use std::path::Path;
use tracing::{debug, trace};

impl<R: Ring> Engine<R> {
    /// Submit as much queued work as the budgets allow
    pub(crate) fn schedule(&mut self) -> Result<()> {
        self.buffers.release_all(&mut self.retired);
        self.schedule_file_closes()?;
        self.schedule_transfers()?;
        self.schedule_opens()?;
        self.schedule_stats()?;
        self.schedule_directories()
    }

    fn schedule_file_closes(&mut self) -> Result<()> {
        while self.ring.available() >= 2 {
            let Some(job_id) = self.queues.close.pop_front() else {
                break;
            };
            let job = self.job(job_id)?;
            let (Some(src_slot), Some(dst_slot)) = (job.src_slot, job.dst_slot) else {
                return Err(CopyError::Internal(format!(
                    "closing {} without open slots",
                    job.src.display()
                )));
            };
            self.enqueue(PendingOp::CloseFile {
                job: job_id,
                src_slot,
                dst_slot,
            })?;
        }
        Ok(())
    }

    /// Issue chunks round-robin across files with bytes left to submit
    fn schedule_transfers(&mut self) -> Result<()> {
        let chunk_size = self.config.buffer_size;
        let per_file = self.config.chunks_per_file;
        loop {
            let mut issued = false;
            let mut remaining = self.queues.transfer.len();
            while remaining > 0 {
                remaining -= 1;
                if self.ring.available() < 2 {
                    return Ok(());
                }
                let Some(job_id) = self.queues.transfer.pop_front() else {
                    break;
                };
                let (has_more, in_flight) = {
                    let job = self.job(job_id)?;
                    (job.has_unsubmitted(), job.chunks_in_flight)
                };
                if !has_more {
                    self.job_mut(job_id)?.queued = false;
                    continue;
                }
                if in_flight >= per_file {
                    self.queues.transfer.push_back(job_id);
                    continue;
                }

                let buf = match self.buffers.acquire() {
                    Some(buf) => buf,
                    None => {
                        // The job keeps its place at the head of the queue.
                        self.queues.transfer.push_front(job_id);
                        self.drain_ready()?;
                        self.buffers.release_all(&mut self.retired);
                        match self.buffers.acquire() {
                            Some(buf) => {
                                self.queues.transfer.pop_front();
                                buf
                            }
                            None => {
                                trace!("buffer pool exhausted, deferring transfers");
                                return Ok(());
                            }
                        }
                    }
                };

                let job = self.job_mut(job_id)?;
                let (Some(src_slot), Some(dst_slot)) = (job.src_slot, job.dst_slot) else {
                    return Err(CopyError::Internal(format!(
                        "transfer of {} without open slots",
                        job.src.display()
                    )));
                };
                let Some((offset, len)) = job.next_chunk(chunk_size) else {
                    return Err(CopyError::Internal(format!(
                        "no chunk left for {}",
                        job.src.display()
                    )));
                };
                let has_more = job.has_unsubmitted();
                job.queued = has_more;
                if has_more {
                    self.queues.transfer.push_back(job_id);
                }
                trace!(job = %job_id, offset, len, "chunk");
                self.enqueue(PendingOp::Chunk {
                    job: job_id,
                    src_slot,
                    dst_slot,
                    buf,
                    offset,
                    len,
                })?;
                issued = true;
            }
            if !issued || self.queues.transfer.is_empty() {
                return Ok(());
            }
        }
    }

    /// Open source and destination of jobs whose destination directory exists
    fn schedule_opens(&mut self) -> Result<()> {
        while self.ring.available() >= 2 {
            let Some(&job_id) = self.queues.open.front() else {
                break;
            };
            if self.slots.available() < 2 {
                self.drain_ready()?;
                if self.slots.available() < 2 {
                    trace!("fixed slots exhausted, deferring opens");
                    break;
                }
            }
            self.queues.open.pop_front();

            let src_slot = self.acquire_slot()?;
            let dst_slot = self.acquire_slot()?;
            let job = self.job_mut(job_id)?;
            job.advance(CopyState::CopyInProgress)?;
            job.src_slot = Some(src_slot);
            job.dst_slot = Some(dst_slot);
            let src = job.src_c.clone();
            let dst = job.dst_c.clone();
            debug!(file = %job.src.display(), src_slot, dst_slot, "opening");

            self.enqueue(PendingOp::OpenSource {
                job: job_id,
                path: src,
                slot: src_slot,
            })?;
            self.enqueue(PendingOp::OpenDestination {
                job: job_id,
                path: dst,
                slot: dst_slot,
            })?;
        }
        Ok(())
    }

    fn schedule_stats(&mut self) -> Result<()> {
        while self.ring.available() >= 1 {
            let Some(job_id) = self.queues.stat.pop_front() else {
                break;
            };
            let job = self.job_mut(job_id)?;
            job.advance(CopyState::StatSubmitted)?;
            let path = job.src_c.clone();
            let follow = job.origin == Origin::Root;
            self.enqueue(PendingOp::Stat {
                job: job_id,
                path,
                follow,
                statx: statx_buffer(),
            })?;
        }
        Ok(())
    }

    /// Queue a job whose size is known for opening, or park it on its
    /// destination directory
    pub(crate) fn ready_to_open(&mut self, job_id: JobId) -> Result<()> {
        let dest_dir = self.job(job_id)?.dest_dir().map(Path::to_path_buf);
        if self.created.allows(dest_dir.as_deref()) {
            self.queues.open.push_back(job_id);
        } else if let Some(dir) = dest_dir {
            self.park(dir, Parked::File(job_id));
        }
        Ok(())
    }

    fn acquire_slot(&mut self) -> Result<FixedSlot> {
        self.slots
            .acquire()
            .map_err(|e| CopyError::Internal(e.to_string()))
    }

    pub(crate) fn job(&self, id: JobId) -> Result<&CopyJob> {
        self.files
            .get(id)
            .ok_or_else(|| CopyError::Internal(format!("unknown copy job {id}")))
    }

    pub(crate) fn job_mut(&mut self, id: JobId) -> Result<&mut CopyJob> {
        self.files
            .get_mut(id)
            .ok_or_else(|| CopyError::Internal(format!("unknown copy job {id}")))
    }
}
