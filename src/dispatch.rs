//! Completion dispatch
//!
//! Every completion carries the [`OpId`] of the record that produced it.
//! A completion for an intermediate entry of a link chain (the directory
//! open before a read, the read before a write, the first close) only
//! appears when that entry failed or, for a read, came up short; either is
//! fatal. The completion of the last entry removes the record and hands
//! its resources back.

use crate::engine::Engine;
use crate::error::{CopyError, Result};
use crate::job::{CopyJob, CopyState, DirectoryJob, Origin, ScanState};
use crate::pending::PendingOp;
use crate::table::{DirId, JobId, OpId, TableId};
use fixed_ring::{Completion, Ring};
use std::path::PathBuf;
use tracing::{debug, trace};

impl<R: Ring> Engine<R> {
    /// Route one completion to its handler
    pub(crate) fn dispatch(&mut self, completion: Completion) -> Result<()> {
        let id = OpId::from_index(completion.tag());
        let result = completion.result();
        let Some(record) = self.pending.get(id) else {
            return Err(CopyError::Internal(format!(
                "completion for unknown tag {id}"
            )));
        };
        trace!(
            tag = %id,
            op = record.op_name(completion.link_index()),
            result,
            "completion"
        );

        if completion.link_index() < record.final_link() {
            return Err(self.intermediate_failure(record, completion));
        }

        let Some(record) = self.pending.remove(id) else {
            return Err(CopyError::Internal(format!("tag {id} vanished")));
        };
        if result < 0 && !is_tolerated(&record, result) {
            let (op, path) = (record.op_name(completion.link_index()), self.path_of(&record));
            return Err(CopyError::from_result(op, path, result));
        }

        match record {
            PendingOp::MkDir { dir, .. } => self.on_mkdir(dir, result),
            PendingOp::Scan { dir, slot, buf, .. } => {
                let n = result as usize;
                if n > 0 {
                    self.handle_entries(dir, &buf.as_slice()[..n.min(buf.len())])?;
                    let job = self.dir_mut(dir)?;
                    job.buf = Some(buf);
                    self.queues.rescan.push_back(dir);
                } else {
                    let job = self.dir_mut(dir)?;
                    job.scan = ScanState::Closing;
                    debug!(dir = %job.src.display(), slot, "end of directory");
                    self.dir_buffers.push(buf);
                    self.queues.close_dir.push_back(dir);
                }
                Ok(())
            }
            PendingOp::CloseDir { dir, slot } => {
                self.release_slot(slot)?;
                self.active_scans = self.active_scans.saturating_sub(1);
                let job = self.dir_mut(dir)?;
                job.scan = ScanState::Closed;
                job.slot = None;
                self.retire_dir_if_finished(dir);
                Ok(())
            }
            PendingOp::Stat { job, statx, .. } => self.on_stat(job, &statx),
            PendingOp::OpenSource { job, .. } => {
                self.job_mut(job)?.src_open = true;
                self.on_open(job)
            }
            PendingOp::OpenDestination { job, .. } => {
                self.job_mut(job)?.dst_open = true;
                self.on_open(job)
            }
            PendingOp::Chunk { job, buf, len, .. } => {
                let written = result as u32;
                if written != len {
                    let path = self.job(job)?.dst.clone();
                    return Err(CopyError::ShortTransfer {
                        op: "write",
                        path,
                        expected: len,
                        actual: written,
                    });
                }
                self.retired.push(buf);
                self.stats.bytes_copied += u64::from(written);
                self.on_write(job, written)
            }
            PendingOp::CloseFile {
                job,
                src_slot,
                dst_slot,
            } => {
                self.release_slot(src_slot)?;
                self.release_slot(dst_slot)?;
                if let Some(done) = self.files.remove(job) {
                    debug!(file = %done.dst.display(), bytes = done.bytes_copied(), "file done");
                }
                Ok(())
            }
        }
    }

    fn intermediate_failure(&self, record: &PendingOp, completion: Completion) -> CopyError {
        let op = record.op_name(completion.link_index());
        let path = self.path_of(record);
        match record {
            PendingOp::Chunk { len, .. } if completion.result() >= 0 => CopyError::ShortTransfer {
                op,
                path,
                expected: *len,
                actual: completion.result() as u32,
            },
            _ if completion.result() >= 0 => CopyError::Internal(format!(
                "unexpected success report for {op} on {}",
                path.display()
            )),
            _ => CopyError::from_result(op, path, completion.result()),
        }
    }

    /// Path an error about `record` should name
    fn path_of(&self, record: &PendingOp) -> PathBuf {
        let dir_src = |d: DirId| self.dirs.get(d).map(|j| j.src.clone());
        let dir_dst = |d: DirId| self.dirs.get(d).map(|j| j.dst.clone());
        let file = |j: JobId| self.files.get(j);
        match record {
            PendingOp::MkDir { dir, .. } => dir_dst(*dir),
            PendingOp::Scan { dir, .. } | PendingOp::CloseDir { dir, .. } => dir_src(*dir),
            PendingOp::Stat { job, .. } | PendingOp::OpenSource { job, .. } => {
                file(*job).map(|j| j.src.clone())
            }
            PendingOp::OpenDestination { job, .. } => file(*job).map(|j| j.dst.clone()),
            PendingOp::Chunk { job, .. } | PendingOp::CloseFile { job, .. } => {
                file(*job).map(|j| j.dst.clone())
            }
        }
        .unwrap_or_default()
    }

    fn on_mkdir(&mut self, dir: DirId, result: i32) -> Result<()> {
        if result == 0 {
            self.stats.directories_created += 1;
        }
        let job = self.dir_mut(dir)?;
        job.mkdir_done = true;
        let dst = job.dst.clone();
        trace!(dir = %dst.display(), existed = result != 0, "mkdir done");
        self.mark_created(&dst);
        self.retire_dir_if_finished(dir);
        Ok(())
    }

    fn on_stat(&mut self, job_id: JobId, statx: &libc::statx) -> Result<()> {
        let file_type = u32::from(statx.stx_mode) & libc::S_IFMT;
        let origin = self.job(job_id)?.origin;

        if file_type == libc::S_IFDIR && origin == Origin::Unclassified {
            if let Some(job) = self.files.remove(job_id) {
                debug!(path = %job.src.display(), "unclassified entry is a directory");
                self.add_directory(job.src, job.dst)?;
            }
            return Ok(());
        }
        if file_type != libc::S_IFREG {
            if let Some(job) = self.files.remove(job_id) {
                debug!(path = %job.src.display(), mode = statx.stx_mode, "skipping non-regular file");
            }
            self.stats.entries_skipped += 1;
            return Ok(());
        }

        let job = self.job_mut(job_id)?;
        job.set_size(statx.stx_size)?;
        job.advance(CopyState::StatDone)?;
        self.ready_to_open(job_id)
    }

    fn on_open(&mut self, job_id: JobId) -> Result<()> {
        let job = self.job_mut(job_id)?;
        if !job.is_open() {
            return Ok(());
        }
        if job.size() == Some(0) {
            self.finish_file(job_id)
        } else {
            self.queue_transfer(job_id)
        }
    }

    fn on_write(&mut self, job_id: JobId, written: u32) -> Result<()> {
        let job = self.job_mut(job_id)?;
        job.record_write(written);
        if job.is_fully_copied() {
            self.finish_file(job_id)
        } else if job.has_unsubmitted() && !job.queued {
            self.queue_transfer(job_id)
        } else {
            Ok(())
        }
    }

    fn queue_transfer(&mut self, job_id: JobId) -> Result<()> {
        self.job_mut(job_id)?.queued = true;
        self.queues.transfer.push_back(job_id);
        Ok(())
    }

    fn finish_file(&mut self, job_id: JobId) -> Result<()> {
        let job: &mut CopyJob = self.job_mut(job_id)?;
        job.advance(CopyState::CopyDone)?;
        self.stats.files_copied += 1;
        self.queues.close.push_back(job_id);
        Ok(())
    }

    fn dir_mut(&mut self, dir: DirId) -> Result<&mut DirectoryJob> {
        self.dirs
            .get_mut(dir)
            .ok_or_else(|| CopyError::Internal(format!("unknown directory {dir}")))
    }
}

/// Negative results that still count as success
fn is_tolerated(record: &PendingOp, result: i32) -> bool {
    matches!(record, PendingOp::MkDir { .. }) && result == -libc::EEXIST
}
