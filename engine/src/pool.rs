//! The worker pool.
//!
//! A `WorkerPool` owns the job queue and a dynamic set of worker threads that
//! drain it. Each worker runs the loop
//! `Created -> Started -> (Waiting <-> Picked job -> Executing)* -> Shutdown`;
//! failed jobs go through the retry coordinator, which either re-queues them or
//! abandons them once their attempts are used up.
//!
//! Shutdown is two-phase: `complete_adding` closes the queue and wakes every
//! sleeping worker, then `wait_for_finish` blocks until the last worker has
//! deregistered. Workers only exit once the queue is empty, so a job that is
//! mid-execution or mid-retry always keeps at least one worker alive.
//!
//! Locks are fine-grained: the queue, the worker registry and the mutable
//! settings each have their own, so resizing the pool never blocks enqueueing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{clamp_buffer_size, clamp_retry_attempts, PoolConfig};
use crate::error::EngineError;
use crate::job::{Job, JobContext};
use crate::model::WorkerId;
use crate::observer::{NoopObserver, Observer};
use crate::queue::{Dequeue, JobQueue};

/// Limits that may change while the pool is running.
struct PoolSettings {
    max_workers: usize,
    max_retry_attempts: u32,
    max_buffer_size: usize,
}

struct WorkerEntry {
    started_at: Instant,
}

struct Shared {
    queue: JobQueue,
    observer: Arc<dyn Observer>,
    settings: Mutex<PoolSettings>,
    workers: Mutex<HashMap<WorkerId, WorkerEntry>>,
    /// Signalled whenever a worker deregisters
    finished: Condvar,
    /// Workers spawned by `start`
    initial_workers: usize,
    next_worker_id: AtomicU64,
    started: AtomicBool,
}

impl Shared {
    fn settings(&self) -> MutexGuard<'_, PoolSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn job_context(&self) -> JobContext {
        let settings = self.settings();
        JobContext {
            observer: Arc::clone(&self.observer),
            retry_limit: settings.max_retry_attempts,
            buffer_size: settings.max_buffer_size,
        }
    }

    fn deregister(&self, id: WorkerId) {
        let mut workers = self.workers();
        if let Some(entry) = workers.remove(&id) {
            debug!(worker = %id, uptime_ms = entry.started_at.elapsed().as_millis() as u64, "worker exited");
        }
        let remaining = workers.len();
        drop(workers);

        self.observer.on_worker_shutdown(id);
        if remaining == 0 {
            self.finished.notify_all();
        }
    }

    fn worker_loop(&self, id: WorkerId) {
        self.observer.on_worker_started(id);

        loop {
            match self.queue.next(id, self.observer.as_ref()) {
                Dequeue::Job(job) => {
                    self.observer.on_worker_picked_job(id, &job);
                    self.execute(job);
                }
                Dequeue::Removed => {
                    debug!(worker = %id, "worker retiring on removal request");
                    break;
                }
                Dequeue::Shutdown => break,
            }
        }
    }

    /// Run a job outside the queue lock and settle its outcome.
    fn execute(&self, mut job: Job) {
        let err = match job.run() {
            Ok(()) => return,
            Err(err) => err,
        };

        let max_attempts = self.settings().max_retry_attempts;
        let attempt = job.retry_count().saturating_add(1);

        if !self.queue.is_cancelled() && err.is_retryable() && attempt < max_attempts {
            job.increment_retry_count();
            warn!(
                job = %job.id(),
                kind = %job.kind(),
                attempt,
                max_attempts,
                error = %err,
                "job failed, requeueing"
            );
            self.observer.on_job_requeued(&job, &err);
            self.queue.requeue(job);
        } else {
            warn!(
                job = %job.id(),
                kind = %job.kind(),
                attempt,
                error = %err,
                "job failed permanently"
            );
            self.observer.on_job_retry_exhausted(&job, &err);
        }
    }
}

/// Registers a worker from its own thread and deregisters it when the thread
/// exits, even by unwinding.
struct WorkerGuard {
    shared: Arc<Shared>,
    id: WorkerId,
    /// Set once the queue has handed this worker `Removed` or `Shutdown`
    retired: bool,
}

impl WorkerGuard {
    fn register(shared: Arc<Shared>, id: WorkerId) -> Self {
        shared.workers().insert(
            id,
            WorkerEntry {
                started_at: Instant::now(),
            },
        );
        shared.queue.worker_joined();
        WorkerGuard {
            shared,
            id,
            retired: false,
        }
    }

    fn run(mut self) {
        self.shared.worker_loop(self.id);
        self.retired = true;
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if !self.retired {
            // Unwound out of a job; the queue still counts this worker as live
            self.shared.queue.worker_left();
        }
        self.shared.deregister(self.id);
    }
}

/// A pool of worker threads draining a shared priority queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create a pool that reports to a no-op observer.
    pub fn new(config: PoolConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// Create a pool that reports every lifecycle event to `observer`.
    ///
    /// No threads are spawned until `start` or `add_workers`.
    pub fn with_observer(config: PoolConfig, observer: Arc<dyn Observer>) -> Self {
        let config = config.normalized();
        WorkerPool {
            shared: Arc::new(Shared {
                queue: JobQueue::new(&config.ordering),
                observer,
                settings: Mutex::new(PoolSettings {
                    max_workers: config.workers,
                    max_retry_attempts: config.max_retry_attempts,
                    max_buffer_size: config.max_buffer_size,
                }),
                workers: Mutex::new(HashMap::new()),
                finished: Condvar::new(),
                initial_workers: config.workers,
                next_worker_id: AtomicU64::new(0),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the configured number of workers.
    ///
    /// # Errors
    /// `AlreadyStarted` on a second call; `WorkerSpawn` if a thread cannot be
    /// created (workers spawned before the failure keep running).
    pub fn start(&self) -> Result<(), EngineError> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        let count = self.shared.initial_workers;
        info!(workers = count, "starting worker pool");
        for _ in 0..count {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Create and start `count` additional workers.
    pub fn add_workers(&self, count: usize) -> Result<(), EngineError> {
        if count == 0 {
            return Err(EngineError::InvalidArgument {
                message: "worker count to add must be at least 1".to_string(),
            });
        }
        self.shared.settings().max_workers += count;
        for _ in 0..count {
            self.spawn_worker()?;
        }
        debug!(added = count, total = self.worker_count(), "workers added");
        Ok(())
    }

    /// Ask `count` workers to retire once they are between jobs.
    ///
    /// Demand is capped so that at least one live worker remains to drain
    /// the queue.
    pub fn remove_workers(&self, count: usize) -> Result<(), EngineError> {
        if count == 0 {
            return Err(EngineError::InvalidArgument {
                message: "worker count to remove must be at least 1".to_string(),
            });
        }
        let (pending, live) = self.shared.queue.request_removal(count);
        self.shared.settings().max_workers = live.saturating_sub(pending);
        debug!(requested = count, pending, live, "worker removal requested");
        Ok(())
    }

    /// Spawn one worker and return once its thread has registered itself.
    fn spawn_worker(&self) -> Result<WorkerId, EngineError> {
        let id = WorkerId(self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed));
        self.shared.observer.on_worker_created(id);

        let registered = Arc::new(Barrier::new(2));
        let shared = Arc::clone(&self.shared);
        let thread_registered = Arc::clone(&registered);
        let spawned = thread::Builder::new()
            .name(format!("transfer-{}", id))
            .spawn(move || {
                let guard = WorkerGuard::register(shared, id);
                thread_registered.wait();
                guard.run();
            });

        match spawned {
            // Detached: the worker deregisters itself through its guard
            Ok(_) => {
                registered.wait();
                Ok(id)
            }
            Err(e) => {
                warn!(worker = %id, error = %e, "failed to spawn worker thread");
                self.shared.observer.on_worker_shutdown(id);
                Err(EngineError::WorkerSpawn { source: e })
            }
        }
    }

    /// Submit one job.
    ///
    /// # Errors
    /// `AddingCompleted` or `Cancelled` once the queue is closed.
    pub fn submit(&self, job: Job) -> Result<(), EngineError> {
        let context = self.shared.job_context();
        self.shared.queue.add(job, &context)
    }

    /// Submit a batch with one admission check; all or nothing.
    pub fn submit_batch(&self, jobs: Vec<Job>) -> Result<usize, EngineError> {
        let context = self.shared.job_context();
        self.shared.queue.add_range(jobs, &context)
    }

    /// Declare that no more jobs will be submitted.
    pub fn complete_adding(&self) {
        if self.shared.queue.complete_adding() {
            debug!(pending = self.queue_len(), "adding completed");
            self.shared.observer.on_adding_completed();
        }
    }

    /// Stop accepting and starting jobs. Jobs already executing run to
    /// completion. Each queued job is discarded and reported through
    /// `on_job_retry_exhausted` with `EngineError::Cancelled`.
    pub fn cancel(&self) {
        if let Some(discarded) = self.shared.queue.cancel() {
            info!(discarded = discarded.len(), "worker pool cancelled");
            self.shared.observer.on_cancellation_requested();
            self.shared.queue.discard(discarded);
        }
    }

    /// Block until every worker has shut down.
    ///
    /// # Errors
    /// `NotCompleted` if neither `complete_adding` nor `cancel` was called;
    /// `NotStarted` if no worker was ever spawned.
    pub fn wait_for_finish(&self) -> Result<(), EngineError> {
        if !self.shared.queue.is_adding_completed() && !self.shared.queue.is_cancelled() {
            return Err(EngineError::NotCompleted);
        }
        if self.shared.next_worker_id.load(Ordering::Relaxed) == 0 {
            return Err(EngineError::NotStarted);
        }

        let mut workers = self.shared.workers();
        while !workers.is_empty() {
            workers = self
                .shared
                .finished
                .wait(workers)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Number of workers whose threads are running and have not yet exited.
    pub fn worker_count(&self) -> usize {
        self.shared.workers().len()
    }

    /// Target worker count after pending additions and removals.
    pub fn max_workers(&self) -> usize {
        self.shared.settings().max_workers
    }

    pub fn max_buffer_size(&self) -> usize {
        self.shared.settings().max_buffer_size
    }

    /// Set the I/O chunk size for jobs submitted from now on (clamped to >= 1024).
    pub fn set_max_buffer_size(&self, bytes: usize) {
        self.shared.settings().max_buffer_size = clamp_buffer_size(bytes);
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.shared.settings().max_retry_attempts
    }

    /// Set the attempts allowed per job (clamped to >= 1).
    pub fn set_max_retry_attempts(&self, attempts: u32) {
        self.shared.settings().max_retry_attempts = clamp_retry_attempts(attempts);
    }

    /// Number of jobs waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_adding_completed(&self) -> bool {
        self.shared.queue.is_adding_completed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.queue.is_cancelled()
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.shared.observer
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Let detached workers drain and exit instead of parking forever
        self.complete_adding();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CopyOptions, JobTiming};
    use chrono::{DateTime, Utc};
    use std::fs;
    use std::sync::mpsc;

    /// Parks every started job until the test releases it, and records the
    /// terminal events of each job by target file name.
    struct Gate {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        events: Mutex<Vec<String>>,
    }

    impl Gate {
        fn new() -> (Arc<Gate>, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let gate = Arc::new(Gate {
                entered: Mutex::new(entered_tx),
                release: Mutex::new(release_rx),
                events: Mutex::new(Vec::new()),
            });
            (gate, entered_rx, release_tx)
        }

        fn push(&self, kind: &str, job: &Job) {
            let name = job
                .target()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.events.lock().unwrap().push(format!("{}:{}", kind, name));
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Observer for Gate {
        fn on_job_started(&self, job: &Job, _started_at: DateTime<Utc>) {
            self.push("started", job);
            self.entered.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }

        fn on_job_ended(&self, job: &Job, _timing: &JobTiming) {
            self.push("ended", job);
        }

        fn on_job_error(&self, job: &Job, _error: &EngineError) {
            self.push("error", job);
        }

        fn on_job_requeued(&self, job: &Job, _error: &EngineError) {
            self.push("requeued", job);
        }

        fn on_job_retry_exhausted(&self, job: &Job, error: &EngineError) {
            let kind = if matches!(error, EngineError::Cancelled) {
                "cancelled"
            } else {
                "exhausted"
            };
            self.push(kind, job);
        }
    }

    #[test]
    fn test_wait_before_complete_is_rejected() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(1));
        pool.start().expect("Failed to start pool");
        assert!(matches!(pool.wait_for_finish(), Err(EngineError::NotCompleted)));

        pool.complete_adding();
        pool.wait_for_finish().expect("Pool should finish");
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn test_wait_on_unstarted_pool_is_rejected() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(1));
        pool.complete_adding();
        assert!(matches!(pool.wait_for_finish(), Err(EngineError::NotStarted)));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
        pool.start().expect("Failed to start pool");
        assert!(matches!(pool.start(), Err(EngineError::AlreadyStarted)));
        pool.complete_adding();
        pool.wait_for_finish().expect("Pool should finish");
    }

    #[test]
    fn test_zero_worker_changes_are_rejected() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(1));
        assert!(matches!(
            pool.add_workers(0),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            pool.remove_workers(0),
            Err(EngineError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_settings_are_clamped() {
        let pool = WorkerPool::new(
            PoolConfig::default()
                .with_workers(1)
                .with_max_buffer_size(1)
                .with_max_retry_attempts(0),
        );
        assert_eq!(pool.max_buffer_size(), 1024);
        assert_eq!(pool.max_retry_attempts(), 1);

        pool.set_max_buffer_size(64 * 1024);
        pool.set_max_retry_attempts(0);
        assert_eq!(pool.max_buffer_size(), 64 * 1024);
        assert_eq!(pool.max_retry_attempts(), 1);
    }

    #[test]
    fn test_submit_after_complete_is_rejected() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(1));
        pool.complete_adding();
        let result = pool.submit(Job::create_directory("never"));
        assert!(matches!(result, Err(EngineError::AddingCompleted)));
    }

    #[test]
    fn test_cancel_discards_queue_and_releases_waiters() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = WorkerPool::new(PoolConfig::default().with_workers(1));
        pool.submit(Job::create_directory(temp_dir.path().join("never")))
            .expect("Failed to submit");

        pool.cancel();
        assert!(pool.is_cancelled());
        assert_eq!(pool.queue_len(), 0);
        assert!(matches!(
            pool.submit(Job::create_directory("x")),
            Err(EngineError::Cancelled)
        ));

        pool.start().expect("Failed to start pool");
        pool.wait_for_finish().expect("Cancelled pool should finish");
        assert!(!temp_dir.path().join("never").exists());
    }

    #[test]
    fn test_remove_workers_shrinks_running_pool() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(3));
        pool.start().expect("Failed to start pool");
        pool.remove_workers(2).expect("Failed to request removal");

        // Idle workers retire as soon as they are woken
        while pool.worker_count() > 1 {
            thread::yield_now();
        }
        assert_eq!(pool.worker_count(), 1);
        assert_eq!(pool.max_workers(), 1);

        pool.complete_adding();
        pool.wait_for_finish().expect("Pool should finish");
    }

    #[test]
    fn test_pool_runs_submitted_jobs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
        pool.start().expect("Failed to start pool");

        let jobs = (0..10)
            .map(|i| {
                Job::create(
                    format!("file {}", i).into_bytes(),
                    temp_dir.path().join(format!("f{}.txt", i)),
                    CopyOptions::default(),
                )
            })
            .collect();
        assert_eq!(pool.submit_batch(jobs).expect("Failed to submit"), 10);

        pool.complete_adding();
        pool.wait_for_finish().expect("Pool should finish");

        assert_eq!(pool.queue_len(), 0);
        for i in 0..10 {
            let content = fs::read_to_string(temp_dir.path().join(format!("f{}.txt", i)))
                .expect("Failed to read created file");
            assert_eq!(content, format!("file {}", i));
        }
    }

    #[test]
    fn test_cancel_lets_running_job_finish_and_reports_discarded_jobs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (gate, entered, release) = Gate::new();
        let observer: Arc<dyn Observer> = gate.clone();
        let pool = WorkerPool::with_observer(PoolConfig::default().with_workers(1), observer);
        pool.submit(Job::create_directory(temp_dir.path().join("running")).with_priority(1))
            .expect("Failed to submit");
        pool.submit(Job::create_directory(temp_dir.path().join("queued")))
            .expect("Failed to submit");
        pool.start().expect("Failed to start pool");

        entered.recv().expect("First job never started");
        pool.cancel();
        assert_eq!(pool.queue_len(), 0);
        // The discarded job is settled before `cancel` returns
        assert_eq!(gate.events(), vec!["started:running", "cancelled:queued"]);

        release.send(()).expect("Failed to release job");
        pool.wait_for_finish().expect("Cancelled pool should finish");

        assert_eq!(
            gate.events(),
            vec!["started:running", "cancelled:queued", "ended:running"]
        );
        assert!(temp_dir.path().join("running").is_dir());
        assert!(!temp_dir.path().join("queued").exists());
    }

    #[test]
    fn test_job_failing_after_cancel_is_not_retried() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (gate, entered, release) = Gate::new();
        let observer: Arc<dyn Observer> = gate.clone();
        let pool = WorkerPool::with_observer(
            PoolConfig::default()
                .with_workers(1)
                .with_max_retry_attempts(5),
            observer,
        );
        pool.start().expect("Failed to start pool");
        pool.submit(Job::copy(
            temp_dir.path().join("missing.bin"),
            temp_dir.path().join("out.bin"),
            CopyOptions::default(),
        ))
        .expect("Failed to submit");

        entered.recv().expect("Job never started");
        pool.cancel();
        release.send(()).expect("Failed to release job");
        pool.wait_for_finish().expect("Cancelled pool should finish");

        // A missing source is retryable, but the pool is cancelled
        assert_eq!(
            gate.events(),
            vec!["started:out.bin", "error:out.bin", "exhausted:out.bin"]
        );
    }

    #[test]
    fn test_workers_are_registered_when_start_returns() {
        let pool = WorkerPool::new(PoolConfig::default().with_workers(3));
        pool.start().expect("Failed to start pool");
        assert_eq!(pool.worker_count(), 3);

        pool.add_workers(2).expect("Failed to add workers");
        assert_eq!(pool.worker_count(), 5);

        // Every registered worker counts toward the removal cap right away
        pool.remove_workers(10).expect("Failed to request removal");
        assert_eq!(pool.max_workers(), 1);

        pool.complete_adding();
        pool.wait_for_finish().expect("Pool should finish");
    }

    #[test]
    fn test_back_to_back_removals_keep_one_worker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = WorkerPool::new(PoolConfig::default().with_workers(2));
        pool.start().expect("Failed to start pool");

        pool.remove_workers(1).expect("Failed to request removal");
        pool.remove_workers(1).expect("Failed to request removal");
        while pool.worker_count() > 1 {
            thread::yield_now();
        }

        pool.submit(Job::create(
            b"still served".to_vec(),
            temp_dir.path().join("late.txt"),
            CopyOptions::default(),
        ))
        .expect("Failed to submit");
        pool.complete_adding();
        pool.wait_for_finish().expect("Pool should finish");

        assert_eq!(pool.worker_count(), 0);
        assert_eq!(
            fs::read(temp_dir.path().join("late.txt")).expect("Job never ran"),
            b"still served"
        );
    }
}
