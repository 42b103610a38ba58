//! Behaviour shared by every backend
//!
//! Each scenario runs against the blocking emulation and, when the host
//! supports it, against a real io_uring instance.

use fixed_ring::{probe, BlockingRing, Completion, Entry, KernelRing, Op, Ring, RingConfig};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn config() -> RingConfig {
    RingConfig {
        depth: 16,
        fixed_files: 8,
        sqpoll_idle: None,
    }
}

fn backends() -> Vec<Box<dyn Ring>> {
    let mut rings: Vec<Box<dyn Ring>> = vec![Box::new(BlockingRing::new(&config()))];
    if probe::is_available() {
        rings.push(Box::new(KernelRing::new(&config()).unwrap()));
    } else {
        eprintln!("io_uring unavailable; kernel backend skipped");
    }
    rings
}

fn cpath(path: &Path) -> CString {
    CString::new(path.as_os_str().as_bytes()).unwrap()
}

/// Submit and collect exactly `expected` completions
fn run(ring: &mut dyn Ring, expected: usize) -> Vec<Completion> {
    ring.submit().unwrap();
    let mut out = Vec::new();
    while out.len() < expected {
        if ring.peek_completion().is_none() {
            ring.wait_for_completions(1, WAIT).unwrap();
        }
        while let Some(c) = ring.peek_completion() {
            ring.acknowledge(&c);
            out.push(c);
        }
    }
    out
}

#[test]
fn test_copy_file_through_linked_chunk() {
    for mut ring in backends() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src.bin");
        let dst = temp_dir.path().join("dst.bin");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &content).unwrap();
        let (src_c, dst_c) = (cpath(&src), cpath(&dst));

        unsafe {
            ring.push(&[
                Entry::new(
                    Op::Open {
                        path: src_c.as_ptr(),
                        flags: libc::O_RDONLY | libc::O_CLOEXEC,
                        mode: 0,
                        slot: 0,
                    },
                    1,
                ),
                Entry::new(
                    Op::Open {
                        path: dst_c.as_ptr(),
                        flags: libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                        mode: 0o644,
                        slot: 1,
                    },
                    2,
                ),
            ])
            .unwrap();
        }
        let opened = run(ring.as_mut(), 2);
        assert!(opened.iter().all(|c| c.result() == 0), "{opened:?}");

        let mut buf = vec![0u8; content.len()];
        unsafe {
            ring.push(&[
                Entry::new(
                    Op::Read {
                        slot: 0,
                        buf: buf.as_mut_ptr(),
                        len: buf.len() as u32,
                        offset: 0,
                    },
                    3,
                )
                .linked()
                .skip_success(),
                Entry::new(
                    Op::Write {
                        slot: 1,
                        buf: buf.as_ptr(),
                        len: buf.len() as u32,
                        offset: 0,
                    },
                    3,
                ),
            ])
            .unwrap();
        }
        let written = run(ring.as_mut(), 1);
        assert_eq!(written[0].result(), content.len() as i32);
        assert_eq!(written[0].weight(), 2);

        unsafe {
            ring.push(&[
                Entry::new(Op::Close { slot: 0 }, 4)
                    .linked()
                    .skip_success(),
                Entry::new(Op::Close { slot: 1 }, 4),
            ])
            .unwrap();
        }
        let closed = run(ring.as_mut(), 1);
        assert_eq!(closed[0].result(), 0);
        assert_eq!(ring.in_flight(), 0);
        assert_eq!(std::fs::read(&dst).unwrap(), content);
    }
}

#[test]
fn test_short_read_ends_chain_without_write() {
    for mut ring in backends() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("short.bin");
        std::fs::write(&src, b"only eleven").unwrap();
        let dst = temp_dir.path().join("out.bin");
        let (src_c, dst_c) = (cpath(&src), cpath(&dst));

        unsafe {
            ring.push(&[
                Entry::new(
                    Op::Open {
                        path: src_c.as_ptr(),
                        flags: libc::O_RDONLY,
                        mode: 0,
                        slot: 2,
                    },
                    1,
                ),
                Entry::new(
                    Op::Open {
                        path: dst_c.as_ptr(),
                        flags: libc::O_WRONLY | libc::O_CREAT,
                        mode: 0o644,
                        slot: 3,
                    },
                    2,
                ),
            ])
            .unwrap();
        }
        run(ring.as_mut(), 2);

        let mut buf = vec![0u8; 64];
        unsafe {
            ring.push(&[
                Entry::new(
                    Op::Read {
                        slot: 2,
                        buf: buf.as_mut_ptr(),
                        len: 64,
                        offset: 0,
                    },
                    7,
                )
                .linked()
                .skip_success(),
                Entry::new(
                    Op::Write {
                        slot: 3,
                        buf: buf.as_ptr(),
                        len: 64,
                        offset: 0,
                    },
                    7,
                ),
            ])
            .unwrap();
        }
        let results = run(ring.as_mut(), 1);
        assert_eq!(results.len(), 1, "{results:?}");
        assert_eq!(results[0].result(), 11);
        assert_eq!(results[0].link_index(), 0);
        assert_eq!(results[0].weight(), 2);
        assert_eq!(ring.in_flight(), 0);
        assert_eq!(std::fs::metadata(&dst).unwrap().len(), 0);
    }
}

#[test]
fn test_directory_scan_and_close() {
    for mut ring in backends() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["a", "b", "c"] {
            std::fs::write(temp_dir.path().join(name), name).unwrap();
        }
        let dir_c = cpath(temp_dir.path());
        let mut dents = vec![0u8; 8192];

        unsafe {
            ring.push(&[
                Entry::new(
                    Op::OpenDir {
                        path: dir_c.as_ptr(),
                        slot: 5,
                    },
                    1,
                )
                .linked()
                .skip_success(),
                Entry::new(
                    Op::GetDents {
                        slot: 5,
                        buf: dents.as_mut_ptr(),
                        len: 8192,
                    },
                    1,
                ),
            ])
            .unwrap();
        }
        let first = run(ring.as_mut(), 1);
        assert!(first[0].result() > 0);

        unsafe {
            ring.push(&[Entry::new(
                Op::GetDents {
                    slot: 5,
                    buf: dents.as_mut_ptr(),
                    len: 8192,
                },
                2,
            )])
            .unwrap();
        }
        assert_eq!(run(ring.as_mut(), 1)[0].result(), 0);

        unsafe {
            ring.push(&[Entry::new(Op::Close { slot: 5 }, 3)]).unwrap();
        }
        assert_eq!(run(ring.as_mut(), 1)[0].result(), 0);
        assert_eq!(ring.in_flight(), 0);
    }
}

#[test]
fn test_missing_directory_reports_open_only() {
    for mut ring in backends() {
        let temp_dir = TempDir::new().unwrap();
        let dir_c = cpath(&temp_dir.path().join("absent"));
        let mut dents = vec![0u8; 1024];
        unsafe {
            ring.push(&[
                Entry::new(
                    Op::OpenDir {
                        path: dir_c.as_ptr(),
                        slot: 0,
                    },
                    9,
                )
                .linked()
                .skip_success(),
                Entry::new(
                    Op::GetDents {
                        slot: 0,
                        buf: dents.as_mut_ptr(),
                        len: 1024,
                    },
                    9,
                ),
            ])
            .unwrap();
        }
        let results = run(ring.as_mut(), 1);
        assert_eq!(results.len(), 1, "{results:?}");
        assert_eq!(results[0].result(), -libc::ENOENT);
        assert_eq!(results[0].link_index(), 0);
        assert_eq!(results[0].weight(), 2);
        assert_eq!(ring.in_flight(), 0);
    }
}

#[test]
fn test_mkdir_and_statx() {
    for mut ring in backends() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("made");
        let dir_c = cpath(&dir);
        unsafe {
            ring.push(&[Entry::new(
                Op::MkDir {
                    path: dir_c.as_ptr(),
                    mode: 0o755,
                },
                1,
            )])
            .unwrap();
        }
        assert_eq!(run(ring.as_mut(), 1)[0].result(), 0);

        let mut stx: Box<libc::statx> = Box::new(unsafe { std::mem::zeroed() });
        unsafe {
            ring.push(&[Entry::new(
                Op::Statx {
                    path: dir_c.as_ptr(),
                    flags: libc::AT_SYMLINK_NOFOLLOW,
                    mask: libc::STATX_TYPE | libc::STATX_SIZE,
                    buf: &mut *stx,
                },
                2,
            )])
            .unwrap();
        }
        assert_eq!(run(ring.as_mut(), 1)[0].result(), 0);
        assert_eq!(u32::from(stx.stx_mode) & libc::S_IFMT, libc::S_IFDIR);

        unsafe {
            ring.push(&[Entry::new(
                Op::MkDir {
                    path: dir_c.as_ptr(),
                    mode: 0o755,
                },
                3,
            )])
            .unwrap();
        }
        assert_eq!(run(ring.as_mut(), 1)[0].result(), -libc::EEXIST);
    }
}
