//! The shared, lock-protected job queue.
//!
//! One mutex guards the pending jobs, the worker-removal demand and the count
//! of live workers; one condition variable parks idle workers. The
//! adding-completed and cancelled flags are atomics so they can be read
//! without the lock, but they are only ever set while holding it, which keeps
//! the wait predicate race-free.
//!
//! Observer callbacks never run while the lock is held, so an observer may
//! call back into the pool (for example to read `queue_len`). Jobs being added
//! are first reserved under the lock, announced, then pushed; a reservation
//! keeps workers from treating a closed, empty queue as drained.
//!
//! Jobs are re-sorted after every mutation, so the head is always the next job
//! to serve. `VecDeque::make_contiguous().sort_by` is a stable sort: jobs that
//! compare equal keep their insertion order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::config::{JobComparator, OrderingPolicy};
use crate::error::EngineError;
use crate::job::{Job, JobContext};
use crate::model::WorkerId;
use crate::observer::Observer;

/// Outcome of a worker asking the queue for work.
pub(crate) enum Dequeue {
    /// Execute this job
    Job(Job),
    /// The worker absorbed one unit of removal demand and must retire
    Removed,
    /// Adding is completed and the queue is drained, or the pool was cancelled
    Shutdown,
}

struct QueueState {
    jobs: VecDeque<Job>,
    /// Accepted jobs whose "enqueued" notification is still being delivered
    reserved: usize,
    pending_removals: usize,
    /// Workers that joined and have not yet been handed `Removed`/`Shutdown`
    live_workers: usize,
}

pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    comparator: Option<JobComparator>,
    adding_completed: AtomicBool,
    cancel_requested: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new(ordering: &OrderingPolicy) -> Self {
        JobQueue {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                reserved: 0,
                pending_removals: 0,
                live_workers: 0,
            }),
            available: Condvar::new(),
            comparator: ordering.comparator(),
            adding_completed: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.cancel_requested.load(Ordering::Acquire) {
            return Err(EngineError::Cancelled);
        }
        if self.adding_completed.load(Ordering::Acquire) {
            return Err(EngineError::AddingCompleted);
        }
        Ok(())
    }

    fn resort(&self, state: &mut QueueState) {
        if let Some(cmp) = &self.comparator {
            state.jobs.make_contiguous().sort_by(|a, b| cmp(a, b));
        }
    }

    /// Accept one job, stamping `context` onto it, and wake one worker.
    pub(crate) fn add(&self, job: Job, context: &JobContext) -> Result<(), EngineError> {
        self.add_range(vec![job], context).map(|_| ())
    }

    /// Accept a batch with one admission check and one sort.
    ///
    /// Either every job is accepted or none is. Jobs accepted just before a
    /// cancellation are discarded like any other queued job.
    pub(crate) fn add_range(&self, mut jobs: Vec<Job>, context: &JobContext) -> Result<usize, EngineError> {
        let count = jobs.len();
        {
            let mut state = self.lock();
            self.ensure_open()?;
            state.reserved += count;
        }

        for job in &mut jobs {
            job.attach(context.clone());
            context.observer.on_job_enqueued(job);
        }

        let mut state = self.lock();
        state.reserved -= count;
        if self.cancel_requested.load(Ordering::Acquire) {
            drop(state);
            self.available.notify_all();
            self.discard(jobs);
            return Ok(count);
        }
        state.jobs.extend(jobs);
        self.resort(&mut state);
        drop(state);

        // Once closed, every parked worker must re-check the drain condition
        if count > 1 || self.adding_completed.load(Ordering::Acquire) {
            self.available.notify_all();
        } else if count == 1 {
            self.available.notify_one();
        }
        Ok(count)
    }

    /// Put a failed job back. Bypasses the adding-completed check so retries
    /// survive the close of the queue; a cancelled queue discards it.
    pub(crate) fn requeue(&self, job: Job) {
        let mut state = self.lock();
        if self.cancel_requested.load(Ordering::Acquire) {
            drop(state);
            self.discard(vec![job]);
            return;
        }
        state.jobs.push_back(job);
        self.resort(&mut state);
        drop(state);

        self.available.notify_one();
    }

    /// Settle the next step for a worker, or `None` if it has to wait.
    fn poll(&self, state: &mut QueueState) -> Option<Dequeue> {
        if self.cancel_requested.load(Ordering::Acquire) {
            state.live_workers = state.live_workers.saturating_sub(1);
            return Some(Dequeue::Shutdown);
        }
        if state.pending_removals > 0 {
            state.pending_removals -= 1;
            state.live_workers = state.live_workers.saturating_sub(1);
            return Some(Dequeue::Removed);
        }
        if let Some(job) = state.jobs.pop_front() {
            return Some(Dequeue::Job(job));
        }
        if self.adding_completed.load(Ordering::Acquire) && state.reserved == 0 {
            state.live_workers = state.live_workers.saturating_sub(1);
            return Some(Dequeue::Shutdown);
        }
        None
    }

    /// True if `poll` would return without waiting.
    fn ready(&self, state: &QueueState) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
            || state.pending_removals > 0
            || !state.jobs.is_empty()
            || (self.adding_completed.load(Ordering::Acquire) && state.reserved == 0)
    }

    /// Block until the calling worker has something to do.
    ///
    /// Removal demand wins over pending jobs; an empty queue only means
    /// shutdown once adding is completed.
    pub(crate) fn next(&self, worker: WorkerId, observer: &dyn Observer) -> Dequeue {
        let mut state = self.lock();
        loop {
            if let Some(outcome) = self.poll(&mut state) {
                drop(state);
                if let Dequeue::Job(job) = &outcome {
                    observer.on_job_dequeued(job, worker);
                }
                return outcome;
            }
            drop(state);
            observer.on_worker_waiting(worker);

            state = self.lock();
            // Work may have arrived while the lock was released
            if !self.ready(&state) {
                state = self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            drop(state);
            observer.on_worker_woke_up(worker);
            state = self.lock();
        }
    }

    /// Close the queue for adding. Returns false if it was already closed.
    pub(crate) fn complete_adding(&self) -> bool {
        let state = self.lock();
        let first = !self.adding_completed.swap(true, Ordering::AcqRel);
        drop(state);

        if first {
            self.available.notify_all();
        }
        first
    }

    /// Set the cancellation flag and take every pending job out of the queue.
    ///
    /// Returns the removed jobs, or `None` if already cancelled. The caller
    /// settles them with `discard`.
    pub(crate) fn cancel(&self) -> Option<Vec<Job>> {
        let mut state = self.lock();
        if self.cancel_requested.swap(true, Ordering::AcqRel) {
            return None;
        }
        let removed: Vec<Job> = state.jobs.drain(..).collect();
        drop(state);

        self.available.notify_all();
        Some(removed)
    }

    /// Report jobs that will never run as abandoned by cancellation.
    pub(crate) fn discard(&self, jobs: Vec<Job>) {
        for job in jobs {
            debug!(job = %job.id(), kind = %job.kind(), "discarding queued job on cancel");
            job.observer()
                .on_job_retry_exhausted(&job, &EngineError::Cancelled);
        }
    }

    /// Count a new worker before it first asks for work.
    pub(crate) fn worker_joined(&self) {
        self.lock().live_workers += 1;
    }

    /// Forget a worker that exited without being handed `Removed`/`Shutdown`.
    pub(crate) fn worker_left(&self) {
        let mut state = self.lock();
        state.live_workers = state.live_workers.saturating_sub(1);
        state.pending_removals = state
            .pending_removals
            .min(state.live_workers.saturating_sub(1));
    }

    /// Ask `count` workers to retire. Total demand is capped so one worker
    /// that has not already retired remains.
    ///
    /// Returns `(pending_removals, live_workers)` after the request.
    pub(crate) fn request_removal(&self, count: usize) -> (usize, usize) {
        let mut state = self.lock();
        let cap = state.live_workers.saturating_sub(1);
        state.pending_removals = state.pending_removals.saturating_add(count).min(cap);
        let outcome = (state.pending_removals, state.live_workers);
        drop(state);

        self.available.notify_all();
        outcome
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub(crate) fn is_adding_completed(&self) -> bool {
        self.adding_completed.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }
}
