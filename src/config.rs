//! Copy engine configuration

use crate::error::{CopyError, Result};
use fixed_ring::RingConfig;
use std::time::Duration;

/// Smallest chunk the engine will transfer
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;
/// Largest chunk the engine will transfer
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024 * 1024;

/// Which ring backend runs the copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// io_uring when the probe succeeds, the blocking emulation otherwise
    #[default]
    Auto,
    /// io_uring only; fail if unavailable
    Uring,
    /// Synchronous emulation
    Blocking,
}

/// Tunables for one tree copy
///
/// Every budget here is a hard upper bound the engine never exceeds: ring
/// entries in flight, fixed descriptor slots, pooled buffers, concurrent
/// directory scans and in-flight chunks per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyConfig {
    /// Ring depth (maximum entries in flight)
    pub queue_depth: u32,
    /// Registered descriptor slots
    pub fixed_files: u32,
    /// Bytes per chunk; buffers are this size rounded up to whole pages
    pub buffer_size: usize,
    /// Buffers in the pool
    pub buffer_count: usize,
    /// Directories scanned concurrently
    pub batch_size: usize,
    /// Chunks of one file in flight at once
    pub chunks_per_file: usize,
    /// How long one wait for completions may block
    pub idle_timeout: Duration,
    /// SQPOLL idle time in milliseconds, `None` to disable
    pub sqpoll_idle_ms: Option<u32>,
    /// Ring backend
    pub backend: Backend,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            fixed_files: 1024,
            buffer_size: 128 * 1024,
            buffer_count: 64,
            batch_size: 32,
            chunks_per_file: 4,
            idle_timeout: Duration::from_millis(2000),
            sqpoll_idle_ms: None,
            backend: Backend::Auto,
        }
    }
}

impl CopyConfig {
    /// Check every bound
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::InvalidConfig`] if:
    /// - queue depth is outside 2..=32768
    /// - fixed files is outside 2..=65536 (a file copy needs two slots)
    /// - buffer size is outside 4 KiB..=1 GiB
    /// - buffer count, batch size or chunks per file is zero
    /// - idle timeout is below one millisecond
    pub fn validate(&self) -> Result<()> {
        if !(2..=32_768).contains(&self.queue_depth) {
            return Err(CopyError::InvalidConfig(format!(
                "queue depth must be between 2 and 32768, got: {}",
                self.queue_depth
            )));
        }
        if !(2..=65_536).contains(&self.fixed_files) {
            return Err(CopyError::InvalidConfig(format!(
                "fixed files must be between 2 and 65536, got: {}",
                self.fixed_files
            )));
        }
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(CopyError::InvalidConfig(format!(
                "buffer size must be between 4 KiB and 1 GiB, got: {} bytes",
                self.buffer_size
            )));
        }
        if self.buffer_count == 0 {
            return Err(CopyError::InvalidConfig(
                "buffer count must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CopyError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.chunks_per_file == 0 {
            return Err(CopyError::InvalidConfig(
                "chunks per file must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout < Duration::from_millis(1) {
            return Err(CopyError::InvalidConfig(
                "idle timeout must be at least 1 ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Ring sizing derived from this configuration
    #[must_use]
    pub fn ring_config(&self) -> RingConfig {
        RingConfig {
            depth: self.queue_depth,
            fixed_files: self.fixed_files,
            sqpoll_idle: self.sqpoll_idle_ms,
        }
    }
}
