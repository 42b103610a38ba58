//! Command-line interface definitions

use crate::config::{Backend, CopyConfig};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Recursive file-tree copier driving one io_uring instance
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source file or directory
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// Destination path
    ///
    /// A directory SOURCE is copied to DEST (created if missing, merged if
    /// present). A file SOURCE is copied to DEST, or into DEST when DEST is
    /// an existing directory.
    #[arg(value_name = "DEST")]
    pub destination: PathBuf,

    /// Recurse into directories
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Let a kernel thread poll the submission queue
    #[arg(long)]
    pub sqpoll: bool,

    /// Idle time before the SQPOLL thread sleeps, in milliseconds
    #[arg(long, default_value = "1000", requires = "sqpoll")]
    pub sqpoll_idle_ms: u32,

    /// Chunk size in KB
    #[arg(long, default_value = "128")]
    pub buffer_size_kb: usize,

    /// Number of chunk buffers
    ///
    /// Bounds the memory used for file data at `buffer-count` times
    /// `buffer-size-kb`.
    #[arg(long, default_value = "64")]
    pub buffer_count: usize,

    /// Queue depth for `io_uring` operations
    #[arg(long, default_value = "1024")]
    pub queue_depth: u32,

    /// Registered file descriptor slots
    ///
    /// Every open file uses two slots and every directory being scanned
    /// uses one. The process file descriptor limit is raised to cover them
    /// when possible.
    #[arg(long, default_value = "1024")]
    pub fixed_files: u32,

    /// Directories scanned concurrently
    #[arg(long, default_value = "32")]
    pub batch_size: usize,

    /// Chunks of a single file in flight at once
    #[arg(long, default_value = "4")]
    pub chunks_per_file: usize,

    /// How long to wait for a completion before checking for a stall, in
    /// milliseconds
    #[arg(long, default_value = "2000")]
    pub idle_timeout_ms: u64,

    /// Ring backend
    #[arg(long, value_enum, default_value = "auto")]
    pub backend: BackendArg,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Ring backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendArg {
    /// io_uring when available, otherwise blocking system calls
    Auto,
    /// io_uring only
    Uring,
    /// Blocking system calls with the same submission model
    Blocking,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Backend::Auto,
            BackendArg::Uring => Backend::Uring,
            BackendArg::Blocking => Backend::Blocking,
        }
    }
}

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - Source path doesn't exist
    /// - Source is a directory and `-r` was not given
    /// - Both --quiet and --verbose options are used
    /// - Any sizing option is out of bounds
    pub fn validate(&self) -> Result<()> {
        if !self.source.exists() {
            anyhow::bail!("Source path does not exist: {}", self.source.display());
        }

        if self.source.is_dir() && !self.recursive {
            anyhow::bail!(
                "Source is a directory, use -r to copy it: {}",
                self.source.display()
            );
        }

        if self.quiet && self.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        if self.buffer_size_kb > 1024 * 1024 {
            anyhow::bail!(
                "Buffer size too large (max 1GB): {} KB",
                self.buffer_size_kb
            );
        }

        self.to_config().validate()?;
        Ok(())
    }

    /// Engine configuration described by these arguments
    #[must_use]
    pub fn to_config(&self) -> CopyConfig {
        CopyConfig {
            queue_depth: self.queue_depth,
            fixed_files: self.fixed_files,
            buffer_size: self.buffer_size_bytes(),
            buffer_count: self.buffer_count,
            batch_size: self.batch_size,
            chunks_per_file: self.chunks_per_file,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            sqpoll_idle_ms: self.sqpoll.then_some(self.sqpoll_idle_ms),
            backend: self.backend.into(),
        }
    }

    /// Get buffer size in bytes
    #[must_use]
    pub const fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_kb.saturating_mul(1024)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("ringcp").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let args = parse(&["src", "dst"]);
        let config = args.to_config();
        assert_eq!(
            config,
            CopyConfig {
                backend: Backend::Auto,
                ..CopyConfig::default()
            }
        );
        assert!(!args.recursive);
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_options_flow_into_config() {
        let args = parse(&[
            "-r",
            "--sqpoll",
            "--sqpoll-idle-ms",
            "250",
            "--buffer-size-kb",
            "64",
            "--buffer-count",
            "8",
            "--queue-depth",
            "256",
            "--fixed-files",
            "32",
            "--batch-size",
            "4",
            "--chunks-per-file",
            "2",
            "--idle-timeout-ms",
            "50",
            "--backend",
            "blocking",
            "src",
            "dst",
        ]);
        let config = args.to_config();
        assert_eq!(config.buffer_size, 64 * 1024);
        assert_eq!(config.buffer_count, 8);
        assert_eq!(config.queue_depth, 256);
        assert_eq!(config.fixed_files, 32);
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.chunks_per_file, 2);
        assert_eq!(config.idle_timeout, Duration::from_millis(50));
        assert_eq!(config.sqpoll_idle_ms, Some(250));
        assert_eq!(config.backend, Backend::Blocking);
    }

    #[test]
    fn test_sqpoll_idle_requires_sqpoll() {
        let result = Args::try_parse_from(["ringcp", "--sqpoll-idle-ms", "5", "a", "b"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_with_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("test_file.txt");
        fs::write(&file, b"hello").unwrap();
        let args = parse(&[
            file.to_str().unwrap(),
            temp_dir.path().join("dest").to_str().unwrap(),
        ]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_directory_requires_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("dest");
        let src = temp_dir.path().to_str().unwrap();

        let args = parse(&[src, dest.to_str().unwrap()]);
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("use -r"), "{err}");

        let args = parse(&["-r", src, dest.to_str().unwrap()]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let args = parse(&[missing.to_str().unwrap(), "dst"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_quiet_and_verbose_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().to_str().unwrap();
        let args = parse(&["-r", "-q", "-v", src, "dst"]);
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("--quiet and --verbose"));
    }

    #[test]
    fn test_out_of_range_sizes_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().to_str().unwrap();
        for bad in [
            vec!["--queue-depth", "1"],
            vec!["--fixed-files", "1"],
            vec!["--buffer-count", "0"],
            vec!["--buffer-size-kb", "2"],
            vec!["--idle-timeout-ms", "0"],
        ] {
            let mut argv = vec!["-r"];
            argv.extend(bad.iter().copied());
            argv.extend([src, "dst"]);
            assert!(parse(&argv).validate().is_err(), "{bad:?} accepted");
        }
    }
}
