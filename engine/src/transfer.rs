//! Transfer orchestration.
//!
//! A `Transfer` turns a source description (a directory tree or an explicit
//! list of file pairs) into a batch of jobs, runs them on a fresh worker pool
//! and blocks until the pool has drained. Per-file failures never surface as
//! errors here; they are counted in the returned `TransferSummary` and
//! reported to the observer. Only structural problems (unreadable source root,
//! running twice) are returned as `EngineError`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::PoolConfig;
use crate::error::EngineError;
use crate::fs_ops;
use crate::job::Job;
use crate::model::{CopyOptions, EntryKind, JobKind, JobTiming, TransferProgress, WorkerId};
use crate::observer::{NoopObserver, Observer};
use crate::pool::WorkerPool;

/// Priority of directory-creation jobs, served before file copies.
pub const DIRECTORY_PRIORITY: i32 = 1;
/// Priority of file-copy jobs.
pub const FILE_PRIORITY: i32 = 0;

/// What a transfer copies.
#[derive(Debug, Clone)]
pub enum TransferSource {
    /// Mirror the tree under `source` into `target`
    Directory { source: PathBuf, target: PathBuf },
    /// Copy each (source, target) file pair
    Files(Vec<(PathBuf, PathBuf)>),
}

/// Point-in-time values of the transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub files_copied: u64,
    /// DirectoryCreate jobs that completed, including ones whose directory
    /// already existed. Parents made implicitly by file jobs are not counted.
    pub directories_created: u64,
    /// Bytes of files whose copy or create completed
    pub bytes_transferred: u64,
}

/// Observer that keeps aggregate counters and forwards every event to an
/// inner observer.
pub struct TransferStats {
    inner: Arc<dyn Observer>,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_requeued: AtomicU64,
    files_copied: AtomicU64,
    directories_created: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl TransferStats {
    pub fn new(inner: Arc<dyn Observer>) -> Self {
        TransferStats {
            inner,
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            files_copied: AtomicU64::new(0),
            directories_created: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            files_copied: self.files_copied.load(Ordering::Relaxed),
            directories_created: self.directories_created.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
        }
    }
}

impl Observer for TransferStats {
    fn on_job_started(&self, job: &Job, started_at: DateTime<Utc>) {
        self.inner.on_job_started(job, started_at);
    }

    fn on_job_ended(&self, job: &Job, timing: &JobTiming) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        if job.kind() == JobKind::DirectoryCreate {
            self.directories_created.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.on_job_ended(job, timing);
    }

    fn on_job_error(&self, job: &Job, error: &EngineError) {
        self.inner.on_job_error(job, error);
    }

    fn on_job_enqueued(&self, job: &Job) {
        self.inner.on_job_enqueued(job);
    }

    fn on_job_dequeued(&self, job: &Job, worker: WorkerId) {
        self.inner.on_job_dequeued(job, worker);
    }

    fn on_job_requeued(&self, job: &Job, error: &EngineError) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
        self.inner.on_job_requeued(job, error);
    }

    fn on_job_retry_exhausted(&self, job: &Job, error: &EngineError) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.inner.on_job_retry_exhausted(job, error);
    }

    fn on_worker_created(&self, worker: WorkerId) {
        self.inner.on_worker_created(worker);
    }

    fn on_worker_started(&self, worker: WorkerId) {
        self.inner.on_worker_started(worker);
    }

    fn on_worker_waiting(&self, worker: WorkerId) {
        self.inner.on_worker_waiting(worker);
    }

    fn on_worker_woke_up(&self, worker: WorkerId) {
        self.inner.on_worker_woke_up(worker);
    }

    fn on_worker_picked_job(&self, worker: WorkerId, job: &Job) {
        self.inner.on_worker_picked_job(worker, job);
    }

    fn on_worker_shutdown(&self, worker: WorkerId) {
        self.inner.on_worker_shutdown(worker);
    }

    fn on_directory_create_started(&self, job: &Job, path: &Path) {
        self.inner.on_directory_create_started(job, path);
    }

    fn on_directory_create_finished(&self, job: &Job, path: &Path) {
        self.inner.on_directory_create_finished(job, path);
    }

    fn on_directory_create_error(&self, job: &Job, path: &Path, error: &EngineError) {
        self.inner.on_directory_create_error(job, path, error);
    }

    fn on_file_create_started(&self, job: &Job, target: &Path) {
        self.inner.on_file_create_started(job, target);
    }

    fn on_file_create_progress(&self, job: &Job, progress: &TransferProgress) {
        self.inner.on_file_create_progress(job, progress);
    }

    fn on_file_create_finished(&self, job: &Job, target: &Path, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.inner.on_file_create_finished(job, target, bytes);
    }

    fn on_file_create_error(&self, job: &Job, target: &Path, error: &EngineError) {
        self.inner.on_file_create_error(job, target, error);
    }

    fn on_file_copy_started(&self, job: &Job, source: &Path, target: &Path) {
        self.inner.on_file_copy_started(job, source, target);
    }

    fn on_file_copy_progress(&self, job: &Job, progress: &TransferProgress) {
        self.inner.on_file_copy_progress(job, progress);
    }

    fn on_file_copy_finished(&self, job: &Job, source: &Path, target: &Path, bytes: u64) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        self.inner.on_file_copy_finished(job, source, target, bytes);
    }

    fn on_file_copy_error(&self, job: &Job, source: &Path, target: &Path, error: &EngineError) {
        self.inner.on_file_copy_error(job, source, target, error);
    }

    fn on_timestamps_set_started(&self, job: &Job, path: &Path) {
        self.inner.on_timestamps_set_started(job, path);
    }

    fn on_timestamps_set_finished(&self, job: &Job, path: &Path) {
        self.inner.on_timestamps_set_finished(job, path);
    }

    fn on_attributes_set_started(&self, job: &Job, path: &Path) {
        self.inner.on_attributes_set_started(job, path);
    }

    fn on_attributes_set_finished(&self, job: &Job, path: &Path) {
        self.inner.on_attributes_set_finished(job, path);
    }

    fn on_adding_completed(&self) {
        self.inner.on_adding_completed();
    }

    fn on_cancellation_requested(&self) {
        self.inner.on_cancellation_requested();
    }
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub total_jobs: usize,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_requeued: u64,
    pub files_copied: u64,
    pub directories_created: u64,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

impl TransferSummary {
    /// Average throughput over the whole run.
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }

    /// True when no job was abandoned.
    pub fn is_success(&self) -> bool {
        self.jobs_failed == 0
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;

/// A one-shot bulk copy.
pub struct Transfer {
    source: TransferSource,
    pool_config: PoolConfig,
    options: CopyOptions,
    stats: Arc<TransferStats>,
    state: AtomicU8,
}

impl Transfer {
    /// Mirror the directory tree at `source` into `target`.
    pub fn directory(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::new(TransferSource::Directory {
            source: source.into(),
            target: target.into(),
        })
    }

    /// Copy an explicit list of (source, target) file pairs.
    pub fn files<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<PathBuf>,
        T: Into<PathBuf>,
    {
        Self::new(TransferSource::Files(
            pairs.into_iter().map(|(s, t)| (s.into(), t.into())).collect(),
        ))
    }

    pub fn new(source: TransferSource) -> Self {
        Transfer {
            source,
            pool_config: PoolConfig::default(),
            options: CopyOptions::default(),
            stats: Arc::new(TransferStats::new(Arc::new(NoopObserver))),
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn with_copy_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Forward every lifecycle event to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.stats = Arc::new(TransferStats::new(observer));
        self
    }

    /// Live counters; readable from another thread while `run` blocks.
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Build the job batch without running it.
    ///
    /// Directory sources yield a creation job for the target root and every
    /// subdirectory (served first), then one copy job per file.
    pub fn plan(&self) -> Result<Vec<Job>, EngineError> {
        match &self.source {
            TransferSource::Directory { source, target } => {
                let entries = fs_ops::enumerate_tree(source, target)?;
                let mut jobs = Vec::with_capacity(entries.len() + 1);
                jobs.push(Job::create_directory(target).with_priority(DIRECTORY_PRIORITY));
                for entry in entries {
                    let job = match entry.kind {
                        EntryKind::Directory => {
                            Job::create_directory(entry.target).with_priority(DIRECTORY_PRIORITY)
                        }
                        EntryKind::File => Job::copy(entry.source, entry.target, self.options.clone())
                            .with_priority(FILE_PRIORITY),
                    };
                    jobs.push(job);
                }
                Ok(jobs)
            }
            TransferSource::Files(pairs) => Ok(pairs
                .iter()
                .map(|(source, target)| {
                    Job::copy(source, target, self.options.clone()).with_priority(FILE_PRIORITY)
                })
                .collect()),
        }
    }

    /// Run the transfer to completion.
    ///
    /// # Errors
    /// `AlreadyRunning` / `AlreadyFinished` on reuse, or a structural failure
    /// (unreadable source root, worker spawn failure). Per-file failures are
    /// reported in the summary instead.
    pub fn run(&self) -> Result<TransferSummary, EngineError> {
        if let Err(state) = self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
        {
            return Err(if state == RUNNING {
                EngineError::AlreadyRunning
            } else {
                EngineError::AlreadyFinished
            });
        }

        let result = self.execute();
        self.state.store(FINISHED, Ordering::Release);
        result
    }

    fn execute(&self) -> Result<TransferSummary, EngineError> {
        let started = Instant::now();
        let jobs = self.plan()?;
        let total_jobs = jobs.len();

        let observer: Arc<dyn Observer> = self.stats.clone();
        let pool = WorkerPool::with_observer(self.pool_config.clone(), observer);
        pool.submit_batch(jobs)?;
        pool.start()?;
        pool.complete_adding();
        pool.wait_for_finish()?;

        let stats = self.stats.snapshot();
        let summary = TransferSummary {
            total_jobs,
            jobs_succeeded: stats.jobs_succeeded,
            jobs_failed: stats.jobs_failed,
            jobs_requeued: stats.jobs_requeued,
            files_copied: stats.files_copied,
            directories_created: stats.directories_created,
            bytes_transferred: stats.bytes_transferred,
            elapsed: started.elapsed(),
        };

        info!(
            jobs = summary.total_jobs,
            succeeded = summary.jobs_succeeded,
            failed = summary.jobs_failed,
            bytes = summary.bytes_transferred,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "transfer finished"
        );
        Ok(summary)
    }
}
