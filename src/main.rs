//! ringcp: recursive file-tree copier built on io_uring

use anyhow::{Context, Result};
use clap::Parser;
use ringcp::cli::Args;
use ringcp::copy::copy_tree;
use tracing::{error, info, Level};

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging based on verbosity and quiet mode
    if args.quiet {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::ERROR)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(match args.verbose {
                0 => Level::WARN,
                1 => Level::INFO,
                2 => Level::DEBUG,
                _ => Level::TRACE,
            })
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Starting ringcp v{}", env!("CARGO_PKG_VERSION"));
    info!("Source: {}", args.source.display());
    info!("Destination: {}", args.destination.display());
    info!("Backend: {:?}", args.backend);
    info!("Queue depth: {}", args.queue_depth);
    info!("Fixed files: {}", args.fixed_files);
    info!(
        "Buffers: {} x {} KB",
        args.buffer_count, args.buffer_size_kb
    );

    // Validate arguments
    args.validate().context("Invalid arguments")?;

    match copy_tree(&args.source, &args.destination, &args.to_config()) {
        Ok(stats) => {
            info!("Copy completed successfully");
            info!("Files copied: {}", stats.files_copied);
            info!("Bytes copied: {}", stats.bytes_copied);
            info!("Directories created: {}", stats.directories_created);
            info!("Entries skipped: {}", stats.entries_skipped);
            info!("Duration: {:?}", stats.duration);
            info!(
                "Peak usage: {} slots, {} buffers, {} ring entries",
                stats.peak_busy_slots, stats.peak_buffers, stats.peak_in_flight
            );
            Ok(())
        }
        Err(e) => {
            error!("Copy failed: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
