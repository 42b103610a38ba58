//! Tree copy entry point
//!
//! [`copy_tree`] works out what SOURCE and DEST mean, picks a ring backend
//! and runs one [`Engine`] to completion:
//!
//! - a directory SOURCE makes DEST its copy (created if missing, merged
//!   into if present)
//! - a file SOURCE is copied to DEST, or to `DEST/<name>` when DEST is an
//!   existing directory
//!
//! # Usage
//!
//! ```rust,no_run
//! use ringcp::config::CopyConfig;
//! use ringcp::copy::copy_tree;
//! use std::path::Path;
//!
//! let stats = copy_tree(Path::new("/data/src"), Path::new("/backup/src"), &CopyConfig::default())?;
//! println!("{} files, {} bytes", stats.files_copied, stats.bytes_copied);
//! # Ok::<(), ringcp::error::CopyError>(())
//! ```

use crate::config::{Backend, CopyConfig};
use crate::engine::Engine;
use crate::error::{CopyError, Result};
use crate::limits::ensure_fd_capacity;
use fixed_ring::{probe, BlockingRing, KernelRing, Ring, RingError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Statistics for one tree copy
///
/// The peak fields record the highest usage seen of each bounded
/// resource; they never exceed the configured budgets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Regular files whose every byte was written
    pub files_copied: u64,

    /// Bytes acknowledged by write completions
    pub bytes_copied: u64,

    /// Destination directories created (existing ones are not counted)
    pub directories_created: u64,

    /// Symlinks, devices, fifos and sockets left out
    pub entries_skipped: u64,

    /// Wall-clock time of the run
    pub duration: Duration,

    /// Most fixed descriptor slots in use at once
    pub peak_busy_slots: usize,

    /// Most pool buffers handed out at once
    pub peak_buffers: usize,

    /// Most ring entries in flight at once
    pub peak_in_flight: usize,
}

/// Where one copy reads from and writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPlan {
    /// Recursive copy of a directory
    Tree { src: PathBuf, dst: PathBuf },
    /// One regular file
    File { src: PathBuf, dst: PathBuf },
}

impl CopyPlan {
    /// Resolve SOURCE and DEST against the filesystem
    ///
    /// # Errors
    ///
    /// Returns [`CopyError::OperationFailed`] if SOURCE cannot be stat'ed.
    pub fn resolve(source: &Path, dest: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(source)
            .map_err(|e| CopyError::OperationFailed {
                op: "stat",
                path: source.to_path_buf(),
                source: e,
            })?;
        if metadata.is_dir() {
            return Ok(CopyPlan::Tree {
                src: source.to_path_buf(),
                dst: dest.to_path_buf(),
            });
        }
        let dst = match source.file_name() {
            Some(name) if dest.is_dir() => dest.join(name),
            _ => dest.to_path_buf(),
        };
        Ok(CopyPlan::File {
            src: source.to_path_buf(),
            dst,
        })
    }

    /// Destination path that must exist before anything is created
    #[must_use]
    pub fn anchor(&self) -> Option<&Path> {
        match self {
            CopyPlan::Tree { dst, .. } | CopyPlan::File { dst, .. } => dst.parent(),
        }
    }
}

/// Copy SOURCE to DEST
///
/// # Errors
///
/// Returns the first fatal error of the run: a failed stat of SOURCE, an
/// invalid configuration, an unavailable backend, or any [`CopyError`] the
/// engine reports.
pub fn copy_tree(source: &Path, dest: &Path, config: &CopyConfig) -> Result<CopyStats> {
    config.validate()?;
    let plan = CopyPlan::resolve(source, dest)?;

    let mut config = config.clone();
    config.fixed_files = ensure_fd_capacity(config.fixed_files);

    match config.backend {
        Backend::Blocking => run_with(BlockingRing::new(&config.ring_config()), config, &plan),
        Backend::Uring => {
            if !probe::is_available() {
                return Err(RingError::Unsupported(
                    "io_uring with a sparse fixed file table (Linux 5.19+)".to_string(),
                )
                .into());
            }
            run_with(KernelRing::new(&config.ring_config())?, config, &plan)
        }
        Backend::Auto => {
            if probe::is_available() {
                match KernelRing::new(&config.ring_config()) {
                    Ok(ring) => return run_with(ring, config, &plan),
                    Err(e) => warn!("io_uring setup failed ({}), using blocking backend", e),
                }
            } else {
                warn!("io_uring unavailable, using blocking backend");
            }
            run_with(BlockingRing::new(&config.ring_config()), config, &plan)
        }
    }
}

/// Run `plan` on an already built ring
///
/// # Errors
///
/// Any [`CopyError`] the engine reports.
pub fn run_with<R: Ring>(ring: R, config: CopyConfig, plan: &CopyPlan) -> Result<CopyStats> {
    let mut engine = Engine::new(ring, config)?;
    if let Some(anchor) = plan.anchor() {
        engine.seed_created(anchor);
    }
    match plan {
        CopyPlan::Tree { src, dst } => {
            info!("Copying tree {} -> {}", src.display(), dst.display());
            engine.add_tree(src, dst)?;
        }
        CopyPlan::File { src, dst } => {
            info!("Copying file {} -> {}", src.display(), dst.display());
            engine.add_file(src, dst)?;
        }
    }
    engine.run()
}
