//! transfer - Command-line interface for the bulk file transfer engine.
//!
//! Copies a directory tree (or a single file) using a pool of worker threads
//! and prints a summary to stderr when done.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use transfer_engine::{
    ChecksumAlgorithm, EngineConfig, NoopObserver, Observer, OrderingPolicy, TracingObserver,
    Transfer, TransferSummary,
};

/// transfer - A multi-threaded file copy tool
#[derive(Parser, Debug)]
#[command(name = "transfer")]
#[command(version = "0.1.0")]
#[command(about = "Copy files and directory trees with a pool of workers")]
struct Args {
    /// Source directory (or single file)
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Destination directory (or file path when the source is a file)
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// Number of worker threads [default: available parallelism]
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Attempts per file before giving up [default: 3]
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// I/O chunk size in bytes [default: 32768]
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Replace files that already exist at the destination
    #[arg(long)]
    overwrite: bool,

    /// Copy access and modification times
    #[arg(long)]
    copy_timestamps: bool,

    /// Copy permissions / read-only flag
    #[arg(long)]
    copy_attributes: bool,

    /// Verify each copy with a checksum: md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM")]
    verify: Option<String>,

    /// Copy in discovery order instead of directories first
    #[arg(long)]
    fifo: bool,

    /// TOML configuration file; command-line flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log every job and worker transition
    #[arg(short, long)]
    verbose: bool,

    /// Log everything, including per-chunk progress
    #[arg(long)]
    debug: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}

fn print_summary(summary: &TransferSummary) {
    eprintln!();
    eprintln!("Transfer complete!");
    eprintln!(
        "Summary: {} jobs, {} succeeded, {} failed, {} retried",
        summary.total_jobs, summary.jobs_succeeded, summary.jobs_failed, summary.jobs_requeued
    );
    eprintln!(
        "Files copied: {} ({} directories created)",
        summary.files_copied, summary.directories_created
    );
    eprintln!("Bytes copied: {}", format_bytes(summary.bytes_transferred));
    eprintln!("Elapsed: {}", format_duration(summary.elapsed));
    eprintln!(
        "Throughput: {}/s",
        format_bytes(summary.throughput_bytes_per_sec() as u64)
    );
}

/// Install the global subscriber; `RUST_LOG` wins over the flags.
fn init_logging(debug: bool, quiet: bool, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

/// Parse and validate command-line arguments, then run the transfer
fn main() {
    let args = Args::parse();
    init_logging(args.debug, args.quiet, args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Layer the command-line flags over the configuration file.
fn build_config(args: &Args) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };

    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err("Worker count must be at least 1".to_string());
        }
        config.pool.workers = workers;
    }
    if let Some(retries) = args.retries {
        config.pool.max_retry_attempts = retries;
    }
    if let Some(buffer_size) = args.buffer_size {
        config.pool.max_buffer_size = buffer_size;
    }
    if args.fifo {
        config.pool.ordering = OrderingPolicy::Fifo;
    }

    if args.overwrite {
        config.copy.overwrite = true;
    }
    if args.copy_timestamps {
        config.copy.copy_timestamps = true;
    }
    if args.copy_attributes {
        config.copy.copy_attributes = true;
    }
    if let Some(name) = &args.verify {
        let algorithm = ChecksumAlgorithm::parse(name).ok_or_else(|| {
            format!(
                "Invalid hash algorithm '{}'. Must be 'md5', 'sha256', or 'blake3'",
                name
            )
        })?;
        config.copy.verify = Some(algorithm);
    }

    Ok(config)
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    if !args.src.exists() {
        return Err(format!("Source does not exist: {}", args.src.display()));
    }

    let config = build_config(args)?;
    debug!(?config, "effective configuration");

    let transfer = if args.src.is_dir() {
        Transfer::directory(&args.src, &args.dst)
    } else {
        Transfer::files([(args.src.clone(), args.dst.clone())])
    };

    let observer: Arc<dyn Observer> = if args.verbose || args.debug {
        Arc::new(TracingObserver)
    } else {
        Arc::new(NoopObserver)
    };

    let summary = transfer
        .with_pool_config(config.pool)
        .with_copy_options(config.copy)
        .with_observer(observer)
        .run()
        .map_err(|e| format!("Transfer failed: {}", e))?;

    if !args.quiet {
        print_summary(&summary);
    }

    if summary.is_success() {
        Ok(())
    } else {
        Err(format!(
            "{} of {} jobs failed to complete",
            summary.jobs_failed, summary.total_jobs
        ))
    }
}
