//! Copies through a real io_uring instance
//!
//! Every test returns early when the host cannot run the kernel backend.

mod common;

use common::*;
use fixed_ring::{probe, KernelRing};
use ringcp::config::{Backend, CopyConfig};
use ringcp::copy::{copy_tree, run_with, CopyPlan};
use std::time::Duration;
use tempfile::TempDir;

fn uring_config() -> CopyConfig {
    CopyConfig {
        backend: Backend::Uring,
        ..blocking_config()
    }
}

fn skip() -> bool {
    if probe::is_available() {
        return false;
    }
    eprintln!("io_uring unavailable; skipping");
    true
}

#[test]
fn test_tree_copy_through_kernel_ring() {
    if skip() {
        return;
    }
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    for i in 0..30 {
        write_file(
            &src.join(format!("d{}", i % 4)).join(format!("f{i}")),
            i * 5_000,
            i as u8,
        );
    }
    std::fs::create_dir_all(src.join("empty").join("nested")).unwrap();
    let dst = temp.path().join("dst");

    let stats = copy_tree(&src, &dst, &uring_config()).unwrap();

    assert_eq!(stats.files_copied, 30);
    assert_eq!(stats.directories_created, 7);
    assert_trees_equal(&src, &dst);
}

#[test]
fn test_kernel_ring_respects_budgets() {
    if skip() {
        return;
    }
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    for i in 0..20 {
        write_file(&src.join(format!("f{i}")), 70_000, i as u8);
    }
    let dst = temp.path().join("dst");

    let config = CopyConfig {
        queue_depth: 8,
        fixed_files: 4,
        buffer_count: 2,
        ..uring_config()
    };
    let ring = KernelRing::new(&config.ring_config()).unwrap();
    let plan = CopyPlan::resolve(&src, &dst).unwrap();
    let stats = run_with(ring, config, &plan).unwrap();

    assert!(stats.peak_in_flight <= 8);
    assert!(stats.peak_busy_slots <= 4);
    assert!(stats.peak_buffers <= 2);
    assert_trees_equal(&src, &dst);
}

#[test]
fn test_kernel_ring_reports_failed_mkdir() {
    if skip() {
        return;
    }
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    write_file(&src.join("f"), 10, 0);
    let dst = temp.path().join("missing").join("dst");

    let err = copy_tree(&src, &dst, &uring_config()).unwrap_err();
    assert!(
        err.to_string().starts_with(&format!("mkdir failed for {}", dst.display())),
        "{err}"
    );
}
