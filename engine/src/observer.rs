//! Lifecycle notification interface.
//!
//! This module defines the Observer trait, the single sink that receives every
//! lifecycle transition of jobs, workers and the pool. It decouples the engine
//! from whatever consumes the events (CLI output, statistics, tests).
//!
//! Every method has an empty default body, so implementors override only what
//! they care about. All methods are called synchronously on the thread that
//! caused the transition, usually a worker thread in the middle of its loop,
//! so implementations must return quickly.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::error::EngineError;
use crate::job::Job;
use crate::model::{JobTiming, TransferProgress, WorkerId};

/// Receiver of engine lifecycle notifications.
///
/// One observer is shared by reference between a pool and every job submitted
/// to it. Implementations keep no per-call mutable state that needs outside
/// locking; use atomics or an internal mutex where counters are needed.
pub trait Observer: Send + Sync {
    // Job lifecycle

    /// `Job::run` began.
    fn on_job_started(&self, _job: &Job, _started_at: DateTime<Utc>) {}

    /// `Job::run` returned normally.
    fn on_job_ended(&self, _job: &Job, _timing: &JobTiming) {}

    /// The job's implementation raised an error; `run` re-raises it.
    fn on_job_error(&self, _job: &Job, _error: &EngineError) {}

    /// The job was accepted by the queue.
    fn on_job_enqueued(&self, _job: &Job) {}

    /// A worker removed the job from the queue.
    fn on_job_dequeued(&self, _job: &Job, _worker: WorkerId) {}

    /// The job failed and was put back into the queue.
    fn on_job_requeued(&self, _job: &Job, _error: &EngineError) {}

    /// The job failed and will not be attempted again.
    fn on_job_retry_exhausted(&self, _job: &Job, _error: &EngineError) {}

    // Worker lifecycle

    fn on_worker_created(&self, _worker: WorkerId) {}

    fn on_worker_started(&self, _worker: WorkerId) {}

    /// The queue was empty; the worker is about to sleep.
    fn on_worker_waiting(&self, _worker: WorkerId) {}

    fn on_worker_woke_up(&self, _worker: WorkerId) {}

    /// The worker is about to execute `job`.
    fn on_worker_picked_job(&self, _worker: WorkerId, _job: &Job) {}

    fn on_worker_shutdown(&self, _worker: WorkerId) {}

    // File-system operations

    fn on_directory_create_started(&self, _job: &Job, _path: &Path) {}

    fn on_directory_create_finished(&self, _job: &Job, _path: &Path) {}

    /// Raised after "started"; the job's "error" notification follows.
    fn on_directory_create_error(&self, _job: &Job, _path: &Path, _error: &EngineError) {}

    fn on_file_create_started(&self, _job: &Job, _target: &Path) {}

    fn on_file_create_progress(&self, _job: &Job, _progress: &TransferProgress) {}

    fn on_file_create_finished(&self, _job: &Job, _target: &Path, _bytes: u64) {}

    fn on_file_create_error(&self, _job: &Job, _target: &Path, _error: &EngineError) {}

    fn on_file_copy_started(&self, _job: &Job, _source: &Path, _target: &Path) {}

    fn on_file_copy_progress(&self, _job: &Job, _progress: &TransferProgress) {}

    fn on_file_copy_finished(&self, _job: &Job, _source: &Path, _target: &Path, _bytes: u64) {}

    fn on_file_copy_error(&self, _job: &Job, _source: &Path, _target: &Path, _error: &EngineError) {}

    fn on_timestamps_set_started(&self, _job: &Job, _path: &Path) {}

    fn on_timestamps_set_finished(&self, _job: &Job, _path: &Path) {}

    fn on_attributes_set_started(&self, _job: &Job, _path: &Path) {}

    fn on_attributes_set_finished(&self, _job: &Job, _path: &Path) {}

    // Pool lifecycle

    /// No further jobs will be accepted.
    fn on_adding_completed(&self) {}

    fn on_cancellation_requested(&self) {}
}

/// Observer that ignores every notification; installed when none is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Observer that turns notifications into `tracing` events.
///
/// Job and worker transitions log at `debug`, per-chunk progress at `trace`,
/// failures at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_job_started(&self, job: &Job, _started_at: DateTime<Utc>) {
        debug!(job = %job.id(), kind = %job.kind(), attempt = job.retry_count().saturating_add(1), "job started");
    }

    fn on_job_ended(&self, job: &Job, timing: &JobTiming) {
        debug!(job = %job.id(), elapsed_ms = timing.duration().as_millis() as u64, "job ended");
    }

    fn on_job_error(&self, job: &Job, error: &EngineError) {
        warn!(job = %job.id(), kind = %job.kind(), %error, "job failed");
    }

    fn on_job_enqueued(&self, job: &Job) {
        trace!(job = %job.id(), priority = job.priority(), "job enqueued");
    }

    fn on_job_dequeued(&self, job: &Job, worker: WorkerId) {
        trace!(job = %job.id(), %worker, "job dequeued");
    }

    fn on_job_requeued(&self, job: &Job, error: &EngineError) {
        debug!(job = %job.id(), retries = job.retry_count(), %error, "job requeued");
    }

    fn on_job_retry_exhausted(&self, job: &Job, error: &EngineError) {
        warn!(job = %job.id(), kind = %job.kind(), %error, "job abandoned after final attempt");
    }

    fn on_worker_created(&self, worker: WorkerId) {
        debug!(%worker, "worker created");
    }

    fn on_worker_started(&self, worker: WorkerId) {
        debug!(%worker, "worker started");
    }

    fn on_worker_waiting(&self, worker: WorkerId) {
        trace!(%worker, "worker waiting");
    }

    fn on_worker_woke_up(&self, worker: WorkerId) {
        trace!(%worker, "worker woke up");
    }

    fn on_worker_picked_job(&self, worker: WorkerId, job: &Job) {
        trace!(%worker, job = %job.id(), "worker picked job");
    }

    fn on_worker_shutdown(&self, worker: WorkerId) {
        debug!(%worker, "worker shut down");
    }

    fn on_directory_create_finished(&self, _job: &Job, path: &Path) {
        debug!(path = %path.display(), "directory created");
    }

    fn on_file_create_finished(&self, _job: &Job, target: &Path, bytes: u64) {
        debug!(target = %target.display(), bytes, "file created");
    }

    fn on_file_copy_progress(&self, _job: &Job, progress: &TransferProgress) {
        trace!(
            target = %progress.target.display(),
            transferred = progress.transferred_bytes,
            total = progress.total_bytes,
            "copy progress"
        );
    }

    fn on_file_copy_finished(&self, _job: &Job, source: &Path, target: &Path, bytes: u64) {
        debug!(source = %source.display(), target = %target.display(), bytes, "file copied");
    }

    fn on_timestamps_set_finished(&self, _job: &Job, path: &Path) {
        debug!(path = %path.display(), "timestamps applied");
    }

    fn on_attributes_set_finished(&self, _job: &Job, path: &Path) {
        debug!(path = %path.display(), "attributes applied");
    }

    fn on_adding_completed(&self) {
        debug!("job queue closed for adding");
    }

    fn on_cancellation_requested(&self) {
        warn!("cancellation requested");
    }
}
