//! # Transfer Engine - Bulk File Transfer Library
//!
//! A headless, multi-threaded engine for copying files and directory trees.
//! Designed as the foundation for multiple front ends (CLI, automation).
//!
//! ## Overview
//!
//! Work is expressed as jobs (copy a file, create a file from bytes, create a
//! directory, set timestamps, set attributes) that are pushed into a priority
//! queue and drained by a pool of worker threads. It features:
//! - Priority, FIFO or custom queue ordering
//! - Workers that can be added and removed while the pool runs
//! - Two-phase shutdown (`complete_adding`, then `wait_for_finish`)
//! - Automatic retry of transient failures with a per-job attempt limit
//! - Lifecycle events delivered to a pluggable observer
//!
//! ## Basic Usage
//!
//! ```no_run
//! use transfer_engine::{PoolConfig, Transfer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let summary = Transfer::directory("/data/source", "/backup/destination")
//!     .with_pool_config(PoolConfig::default().with_workers(8))
//!     .run()?;
//!
//! println!(
//!     "{} files, {} bytes, {} failed",
//!     summary.files_copied, summary.bytes_transferred, summary.jobs_failed
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Driving the pool directly:
//!
//! ```no_run
//! use transfer_engine::{CopyOptions, Job, PoolConfig, WorkerPool};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::new(PoolConfig::default().with_workers(4));
//! pool.start()?;
//! pool.submit(Job::create_directory("/tmp/out"))?;
//! pool.submit(Job::copy("/tmp/a.bin", "/tmp/out/a.bin", CopyOptions::default()))?;
//! pool.complete_adding();
//! pool.wait_for_finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Shared value types (job kinds, options, timings, progress)
//! - **error**: Error types and retry classification
//! - **job**: The unit of work and its executors
//! - **pool**: Worker pool and retry coordinator
//! - **observer**: Lifecycle event trait and stock observers
//! - **transfer**: Directory/file-list orchestration
//! - **fs_ops**: Low-level filesystem operations
//! - **checksums**: Checksum computation and verification
//! - **config**: Pool and engine configuration

pub mod checksums;
pub mod config;
pub mod error;
pub mod fs_ops;
pub mod job;
pub mod model;
pub mod observer;
pub mod pool;
mod queue;
pub mod transfer;

// Re-export main types
pub use checksums::{compute_file_checksum, verify_target, ChecksumAlgorithm, ChecksumValue};
pub use config::{EngineConfig, JobComparator, OrderingPolicy, PoolConfig};
pub use error::EngineError;
pub use job::{Job, JobAction};
pub use model::{
    CopyOptions, EntryKind, FileAttributes, FileTimes, JobKind, JobTiming, TransferProgress,
    WorkerId,
};
pub use observer::{NoopObserver, Observer, TracingObserver};
pub use pool::WorkerPool;
pub use transfer::{StatsSnapshot, Transfer, TransferSource, TransferStats, TransferSummary};
