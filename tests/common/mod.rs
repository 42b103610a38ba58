//! Shared helpers for the integration tests

#![allow(dead_code)]

use fixed_ring::{BlockingRing, Completion, Entry, Op, Ring, RingConfig};
use ringcp::config::{Backend, CopyConfig};
use ringcp::copy::{run_with, CopyPlan, CopyStats};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

pub struct TestTimeoutGuard {
    cancelled: Arc<AtomicBool>,
}

impl Drop for TestTimeoutGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

pub fn test_timeout_guard(duration: Duration) -> TestTimeoutGuard {
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = Arc::clone(&cancelled);
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        if !cancelled_clone.load(Ordering::SeqCst) {
            eprintln!("Test timeout exceeded ({}s). Aborting.", duration.as_secs());
            std::process::abort();
        }
    });
    TestTimeoutGuard { cancelled }
}

/// Whether an event is a submission or a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Push,
    Complete,
}

/// One entry pushed to, or one completion taken from, the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub phase: Phase,
    pub op: &'static str,
    pub path: Option<PathBuf>,
    /// `O_CREAT` was set on an open
    pub create: bool,
    pub offset: u64,
    pub len: u32,
    /// Completion result; `None` for pushes
    pub result: Option<i32>,
}

impl Event {
    pub fn is(&self, phase: Phase, op: &str, path: &Path) -> bool {
        self.phase == phase && self.op == op && self.path.as_deref() == Some(path)
    }
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Ring wrapper that logs every push and every acknowledged completion
pub struct RecordingRing<R: Ring> {
    inner: R,
    log: EventLog,
    /// Pushed entries by (tag, link index), for naming completions
    pushed: HashMap<(u32, u8), Event>,
}

impl<R: Ring> RecordingRing<R> {
    pub fn new(inner: R) -> (Self, EventLog) {
        let log = EventLog::default();
        let ring = Self {
            inner,
            log: Rc::clone(&log),
            pushed: HashMap::new(),
        };
        (ring, log)
    }
}

unsafe fn c_path(ptr: *const libc::c_char) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(CStr::from_ptr(ptr).to_bytes()))
}

fn describe(entry: &Entry) -> Event {
    let mut event = Event {
        phase: Phase::Push,
        op: entry.op().name(),
        path: None,
        create: false,
        offset: 0,
        len: 0,
        result: None,
    };
    // SAFETY: the pointers are valid for the duration of push.
    unsafe {
        match *entry.op() {
            Op::MkDir { path, .. } | Op::OpenDir { path, .. } | Op::Statx { path, .. } => {
                event.path = Some(c_path(path));
            }
            Op::Open { path, flags, .. } => {
                event.path = Some(c_path(path));
                event.create = flags & libc::O_CREAT != 0;
            }
            Op::Read { len, offset, .. } | Op::Write { len, offset, .. } => {
                event.len = len;
                event.offset = offset;
            }
            Op::GetDents { len, .. } => event.len = len,
            Op::Close { .. } => {}
        }
    }
    event
}

impl<R: Ring> Ring for RecordingRing<R> {
    fn depth(&self) -> usize {
        self.inner.depth()
    }

    fn fixed_slots(&self) -> u32 {
        self.inner.fixed_slots()
    }

    fn in_flight(&self) -> usize {
        self.inner.in_flight()
    }

    unsafe fn push(&mut self, entries: &[Entry]) -> fixed_ring::Result<()> {
        self.inner.push(entries)?;
        // Link indices restart at every unlinked entry.
        let mut link_index = 0u8;
        for entry in entries {
            let event = describe(entry);
            self.pushed.insert((entry.tag(), link_index), event.clone());
            self.log.borrow_mut().push(event);
            link_index = if entry.is_linked() { link_index + 1 } else { 0 };
        }
        Ok(())
    }

    fn submit(&mut self) -> fixed_ring::Result<usize> {
        self.inner.submit()
    }

    fn wait_for_completions(
        &mut self,
        count: usize,
        timeout: Option<Duration>,
    ) -> fixed_ring::Result<()> {
        self.inner.wait_for_completions(count, timeout)
    }

    fn peek_completion(&mut self) -> Option<Completion> {
        self.inner.peek_completion()
    }

    fn acknowledge(&mut self, completion: &Completion) {
        let mut event = self
            .pushed
            .get(&(completion.tag(), completion.link_index()))
            .cloned()
            .unwrap_or_else(|| panic!("completion for unknown entry {completion:?}"));
        event.phase = Phase::Complete;
        event.result = Some(completion.result());
        self.log.borrow_mut().push(event);
        self.inner.acknowledge(completion);
    }

    fn acknowledge_n(&mut self, count: usize) {
        self.inner.acknowledge_n(count);
    }
}

/// Small budgets on the blocking backend
pub fn blocking_config() -> CopyConfig {
    CopyConfig {
        queue_depth: 64,
        fixed_files: 16,
        buffer_size: 16 * 1024,
        buffer_count: 4,
        batch_size: 4,
        chunks_per_file: 2,
        idle_timeout: Duration::from_millis(500),
        backend: Backend::Blocking,
        ..CopyConfig::default()
    }
}

/// Copy `src` to `dst` on a recording blocking ring
pub fn run_recorded(
    src: &Path,
    dst: &Path,
    config: CopyConfig,
) -> (ringcp::Result<CopyStats>, Vec<Event>) {
    let ring_config = RingConfig {
        depth: config.queue_depth,
        fixed_files: config.fixed_files,
        sqpoll_idle: None,
    };
    let (ring, log) = RecordingRing::new(BlockingRing::new(&ring_config));
    let result = CopyPlan::resolve(src, dst).and_then(|plan| run_with(ring, config, &plan));
    let events = log.borrow().clone();
    (result, events)
}

/// Index of the first event matching `phase`, `op` and `path`
pub fn position(events: &[Event], phase: Phase, op: &str, path: &Path) -> usize {
    events
        .iter()
        .position(|e| e.is(phase, op, path))
        .unwrap_or_else(|| panic!("no {phase:?} {op} for {}", path.display()))
}

/// Deterministic file content of `len` bytes
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(31).wrapping_add(u32::from(seed)) as u8)
        .collect()
}

pub fn write_file(path: &Path, len: usize, seed: u8) -> Vec<u8> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let data = pattern(len, seed);
    std::fs::write(path, &data).unwrap();
    data
}

/// Relative paths of every directory and regular file under `root`
pub fn tree_listing(root: &Path) -> Vec<(PathBuf, bool)> {
    let mut listing: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(Result::unwrap)
        .filter(|e| e.file_type().is_dir() || e.file_type().is_file())
        .map(|e| {
            (
                e.path().strip_prefix(root).unwrap().to_path_buf(),
                e.file_type().is_dir(),
            )
        })
        .collect();
    listing.sort();
    listing
}

/// Assert `dst` holds the same directories and regular files as `src`
pub fn assert_trees_equal(src: &Path, dst: &Path) {
    let listing = tree_listing(src);
    assert_eq!(listing, tree_listing(dst));
    for (rel, is_dir) in listing {
        if !is_dir {
            assert_eq!(
                std::fs::read(src.join(&rel)).unwrap(),
                std::fs::read(dst.join(&rel)).unwrap(),
                "content differs for {}",
                rel.display()
            );
        }
    }
}

/// Largest number of chunks between a read push and its write completion
pub fn peak_chunks_outstanding(events: &[Event]) -> usize {
    let mut outstanding = 0usize;
    let mut peak = 0;
    for event in events {
        match (event.phase, event.op) {
            (Phase::Push, "read") => {
                outstanding += 1;
                peak = peak.max(outstanding);
            }
            (Phase::Complete, "write") => outstanding -= 1,
            _ => {}
        }
    }
    peak
}
