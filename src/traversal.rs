//! Directory traversal
//!
//! Directories are scanned breadth-first: each newly found directory joins
//! the scan queue, and at most `batch_size` scans hold a directory handle
//! at once. A scan is an `OpenDir` linked (skip-success) to a `GetDents`,
//! followed by further `GetDents` on the same slot until the read returns
//! zero, then a `Close` of the slot.
//!
//! Destination directories are created top-down. A directory's mkdir is
//! submitted only once its parent destination is in the created set;
//! until then it waits in the parked list of the parent, together with any
//! files destined for that parent.

use crate::buffer::AlignedBuffer;
use crate::dirent::{Dirents, EntryType};
use crate::engine::{Engine, Parked};
use crate::error::{CopyError, Result};
use crate::job::{DirectoryJob, Origin, ScanState};
use crate::pending::PendingOp;
use crate::slots::SlotError;
use crate::table::DirId;
use fixed_ring::Ring;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Size of every directory-entry buffer
pub const DIR_BUFFER_SIZE: usize = 64 * 1024;

/// Destination directories known to exist
#[derive(Debug, Default)]
pub struct CreatedDirs {
    dirs: HashSet<PathBuf>,
}

impl CreatedDirs {
    pub fn insert(&mut self, dir: PathBuf) -> bool {
        self.dirs.insert(dir)
    }

    /// Whether children of `dir` may be created
    ///
    /// `None` stands for the parent of a filesystem root, which always
    /// exists.
    #[must_use]
    pub fn allows(&self, dir: Option<&Path>) -> bool {
        dir.map_or(true, |d| self.dirs.contains(d))
    }
}

impl<R: Ring> Engine<R> {
    /// Create a directory job, queue its scan and gate its mkdir
    pub(crate) fn add_directory(&mut self, src: PathBuf, dst: PathBuf) -> Result<DirId> {
        let parent = dst.parent().map(Path::to_path_buf);
        let dir = self.dirs.insert(DirectoryJob::new(src, dst)?);
        self.queues.scan.push_back(dir);
        if self.created.allows(parent.as_deref()) {
            self.queues.mkdir.push_back(dir);
        } else if let Some(parent) = parent {
            self.park(parent, Parked::Dir(dir));
        }
        Ok(dir)
    }

    pub(crate) fn park(&mut self, parent: PathBuf, what: Parked) {
        trace!(parent = %parent.display(), ?what, "parked");
        self.parked.entry(parent).or_default().push(what);
    }

    /// Record a created destination directory and release what waited on it
    pub(crate) fn mark_created(&mut self, dir: &Path) {
        self.created.insert(dir.to_path_buf());
        for parked in self.parked.remove(dir).unwrap_or_default() {
            match parked {
                Parked::File(job) => self.queues.open.push_back(job),
                Parked::Dir(child) => self.queues.mkdir.push_back(child),
            }
        }
    }

    /// Drop a directory job once its mkdir and close are both done
    pub(crate) fn retire_dir_if_finished(&mut self, dir: DirId) {
        if self.dirs.get(dir).is_some_and(DirectoryJob::is_finished) {
            if let Some(job) = self.dirs.remove(dir) {
                debug!(dir = %job.src.display(), "directory done");
            }
        }
    }

    /// Turn the records of one directory read into jobs
    pub(crate) fn handle_entries(&mut self, dir: DirId, buf: &[u8]) -> Result<()> {
        let (src, dst) = match self.dirs.get(dir) {
            Some(job) => (job.src.clone(), job.dst.clone()),
            None => return Err(CopyError::Internal(format!("unknown directory {dir}"))),
        };
        for entry in Dirents::new(buf) {
            let entry = entry.map_err(|m| CopyError::MalformedDirent {
                dir: src.clone(),
                offset: m.offset,
                reason: m.reason,
            })?;
            if entry.is_dot() {
                continue;
            }
            let child_src = src.join(entry.name());
            let child_dst = dst.join(entry.name());
            match entry.kind {
                EntryType::Regular => {
                    self.add_copy_job(child_src, child_dst, Origin::Regular)?;
                }
                EntryType::Directory => {
                    self.add_directory(child_src, child_dst)?;
                }
                EntryType::Unknown => {
                    self.add_copy_job(child_src, child_dst, Origin::Unclassified)?;
                }
                EntryType::Other(d_type) => {
                    debug!(path = %child_src.display(), d_type, "skipping non-regular entry");
                    self.stats.entries_skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// Submit mkdirs, directory closes, follow-up reads and new scans
    pub(crate) fn schedule_directories(&mut self) -> Result<()> {
        self.schedule_mkdirs()?;
        self.schedule_dir_closes()?;
        self.schedule_rescans()?;
        self.schedule_scans()
    }

    fn schedule_mkdirs(&mut self) -> Result<()> {
        while self.ring.available() >= 1 {
            let Some(dir) = self.queues.mkdir.pop_front() else {
                break;
            };
            let path = match self.dirs.get(dir) {
                Some(job) => job.dst_c.clone(),
                None => continue,
            };
            self.enqueue(PendingOp::MkDir { dir, path })?;
        }
        Ok(())
    }

    fn schedule_dir_closes(&mut self) -> Result<()> {
        while self.ring.available() >= 1 {
            let Some(dir) = self.queues.close_dir.pop_front() else {
                break;
            };
            let Some(slot) = self.dirs.get(dir).and_then(|d| d.slot) else {
                return Err(CopyError::Internal(format!(
                    "directory {dir} closed without a slot"
                )));
            };
            self.enqueue(PendingOp::CloseDir { dir, slot })?;
        }
        Ok(())
    }

    fn schedule_rescans(&mut self) -> Result<()> {
        while self.ring.available() >= 1 {
            let Some(dir) = self.queues.rescan.pop_front() else {
                break;
            };
            let Some(job) = self.dirs.get_mut(dir) else {
                continue;
            };
            let (Some(slot), Some(buf)) = (job.slot, job.buf.take()) else {
                return Err(CopyError::Internal(format!(
                    "directory {dir} rescanned without a handle"
                )));
            };
            self.enqueue(PendingOp::Scan {
                dir,
                open: None,
                slot,
                buf,
            })?;
        }
        Ok(())
    }

    fn schedule_scans(&mut self) -> Result<()> {
        while self.active_scans < self.config.batch_size && self.ring.available() >= 2 {
            let Some(&dir) = self.queues.scan.front() else {
                break;
            };
            let slot = match self.slots.acquire() {
                Ok(slot) => slot,
                Err(SlotError::Exhausted) => {
                    self.drain_ready()?;
                    match self.slots.acquire() {
                        Ok(slot) => slot,
                        Err(_) => break,
                    }
                }
                Err(e) => return Err(CopyError::Internal(e.to_string())),
            };
            // Draining may have queued work, but never removes this entry.
            self.queues.scan.pop_front();

            let buf = match self.dir_buffers.pop() {
                Some(buf) => buf,
                None => AlignedBuffer::new(DIR_BUFFER_SIZE)?,
            };
            let Some(job) = self.dirs.get_mut(dir) else {
                self.release_slot(slot)?;
                self.dir_buffers.push(buf);
                continue;
            };
            job.slot = Some(slot);
            job.scan = ScanState::Scanning;
            let open = Some(job.src_c.clone());
            debug!(dir = %job.src.display(), slot, "scanning");
            self.active_scans += 1;
            self.enqueue(PendingOp::Scan {
                dir,
                open,
                slot,
                buf,
            })?;
        }
        Ok(())
    }

    pub(crate) fn release_slot(&mut self, slot: fixed_ring::FixedSlot) -> Result<()> {
        self.slots
            .release(slot)
            .map_err(|e| CopyError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, CopyConfig};
    use crate::dirent::tests::encode;
    use fixed_ring::BlockingRing;
    use tempfile::TempDir;

    fn engine() -> Engine<BlockingRing> {
        let config = CopyConfig {
            queue_depth: 32,
            fixed_files: 8,
            buffer_size: 16 * 1024,
            buffer_count: 2,
            backend: Backend::Blocking,
            ..CopyConfig::default()
        };
        let ring = BlockingRing::new(&config.ring_config());
        Engine::new(ring, config).unwrap()
    }

    /// A directory job whose own scan is already finished
    fn listed_dir(engine: &mut Engine<BlockingRing>, src: &Path, dst: &Path) -> DirId {
        let dir = engine
            .add_directory(src.to_path_buf(), dst.to_path_buf())
            .unwrap();
        engine.queues.scan.retain(|d| *d != dir);
        engine.dirs.get_mut(dir).unwrap().scan = ScanState::Closed;
        dir
    }

    #[test]
    fn test_unknown_entries_are_classified_by_stat() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("inner")).unwrap();
        std::fs::write(src.join("inner").join("x"), b"nested").unwrap();
        std::fs::write(src.join("plain"), b"top level").unwrap();
        std::os::unix::fs::symlink("plain", src.join("lnk")).unwrap();
        let dst = temp.path().join("dst");

        let mut engine = engine();
        engine.seed_created(temp.path());
        let dir = listed_dir(&mut engine, &src, &dst);
        let records = encode(&[
            (1, libc::DT_DIR, "."),
            (2, libc::DT_DIR, ".."),
            (3, libc::DT_UNKNOWN, "inner"),
            (4, libc::DT_UNKNOWN, "plain"),
            (5, libc::DT_UNKNOWN, "lnk"),
        ]);
        engine.handle_entries(dir, &records).unwrap();
        let stats = engine.run().unwrap();

        assert_eq!(stats.files_copied, 2);
        assert_eq!(stats.directories_created, 2);
        assert_eq!(stats.entries_skipped, 1);
        assert_eq!(std::fs::read(dst.join("inner").join("x")).unwrap(), b"nested");
        assert_eq!(std::fs::read(dst.join("plain")).unwrap(), b"top level");
        assert!(std::fs::symlink_metadata(dst.join("lnk")).is_err());
    }

    #[test]
    fn test_malformed_entries_are_fatal() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        let mut engine = engine();
        engine.seed_created(temp.path());
        let dir = listed_dir(&mut engine, &src, &temp.path().join("dst"));

        let mut records = encode(&[(1, libc::DT_REG, "a"), (2, libc::DT_REG, "b")]);
        let second = records.len() / 2;
        records[second + 16] = 0;
        records[second + 17] = 0;

        match engine.handle_entries(dir, &records) {
            Err(CopyError::MalformedDirent {
                dir,
                offset,
                reason,
            }) => {
                assert_eq!(dir, src);
                assert_eq!(offset, second);
                assert_eq!(reason, "zero record length");
            }
            other => panic!("expected malformed entry error, got {other:?}"),
        }
    }

    #[test]
    fn test_created_dirs_gate() {
        let mut created = CreatedDirs::default();
        assert!(created.allows(None));
        assert!(!created.allows(Some(Path::new("/dst"))));
        assert!(created.insert(PathBuf::from("/dst")));
        assert!(!created.insert(PathBuf::from("/dst")));
        assert!(created.allows(Some(Path::new("/dst"))));
    }
}
