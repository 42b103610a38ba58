//! Property tests: random trees copy exactly under random budgets

mod common;

use common::*;
use proptest::prelude::*;
use ringcp::config::CopyConfig;
use std::path::PathBuf;
use tempfile::TempDir;

/// One file at up to three directory levels below the root
fn file_entry() -> impl Strategy<Value = (Vec<u8>, usize)> {
    (prop::collection::vec(0u8..3, 0..3), 0usize..70_000)
}

fn budgets() -> impl Strategy<Value = CopyConfig> {
    (2u32..32, 2u32..12, 1usize..4, 1usize..4, 1usize..3).prop_map(
        |(queue_depth, fixed_files, buffer_count, batch_size, chunks_per_file)| CopyConfig {
            queue_depth,
            fixed_files,
            buffer_count,
            batch_size,
            chunks_per_file,
            ..blocking_config()
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_random_tree_is_copied_exactly(
        files in prop::collection::vec(file_entry(), 0..16),
        config in budgets(),
    ) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir(&src).unwrap();
        for (i, (dirs, len)) in files.iter().enumerate() {
            let mut path: PathBuf = src.clone();
            for d in dirs {
                path.push(format!("dir{d}"));
            }
            write_file(&path.join(format!("file{i}")), *len, i as u8);
        }
        let dst = temp.path().join("dst");

        let (result, events) = run_recorded(&src, &dst, config.clone());
        let stats = result.unwrap();

        assert_trees_equal(&src, &dst);
        prop_assert_eq!(stats.files_copied, files.len() as u64);
        prop_assert_eq!(
            stats.bytes_copied,
            files.iter().map(|(_, len)| *len as u64).sum::<u64>()
        );
        prop_assert!(stats.peak_in_flight <= config.queue_depth as usize);
        prop_assert!(stats.peak_busy_slots <= config.fixed_files as usize);
        prop_assert!(stats.peak_buffers <= config.buffer_count);
        prop_assert!(peak_chunks_outstanding(&events) <= config.buffer_count);
    }
}
