//! Jobs: single units of file-system mutation.
//!
//! A `Job` pairs a `JobAction` (what to do) with scheduling state (priority,
//! retry count) and the context the pool attaches at enqueue time (observer,
//! retry limit, I/O buffer size). Jobs are moved into the queue and out to
//! exactly one worker, so a job can never be executed by two workers at once.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::checksums;
use crate::config::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_RETRY_ATTEMPTS};
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{
    CopyOptions, EntryKind, FileAttributes, FileTimes, JobKind, JobTiming, TransferProgress,
};
use crate::observer::{NoopObserver, Observer};

/// The concrete mutation a job performs.
#[derive(Clone)]
pub enum JobAction {
    /// Copy `source` to `target`
    Copy {
        source: PathBuf,
        target: PathBuf,
        options: CopyOptions,
    },
    /// Write `data` to `target`
    Create {
        data: Arc<[u8]>,
        target: PathBuf,
        options: CopyOptions,
    },
    /// Create the directory `path` (and any missing ancestors)
    DirectoryCreate { path: PathBuf },
    /// Apply `times` to the existing entry at `path`
    SetTimestamps { path: PathBuf, times: FileTimes },
    /// Apply `attributes` to the existing entry at `path`
    SetAttributes {
        path: PathBuf,
        attributes: FileAttributes,
    },
}

impl JobAction {
    pub fn kind(&self) -> JobKind {
        match self {
            JobAction::Copy { .. } => JobKind::Copy,
            JobAction::Create { .. } => JobKind::Create,
            JobAction::DirectoryCreate { .. } => JobKind::DirectoryCreate,
            JobAction::SetTimestamps { .. } => JobKind::SetTimestamps,
            JobAction::SetAttributes { .. } => JobKind::SetAttributes,
        }
    }
}

impl fmt::Debug for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::Copy { source, target, .. } => f
                .debug_struct("Copy")
                .field("source", source)
                .field("target", target)
                .finish(),
            JobAction::Create { data, target, .. } => f
                .debug_struct("Create")
                .field("bytes", &data.len())
                .field("target", target)
                .finish(),
            JobAction::DirectoryCreate { path } => {
                f.debug_struct("DirectoryCreate").field("path", path).finish()
            }
            JobAction::SetTimestamps { path, .. } => {
                f.debug_struct("SetTimestamps").field("path", path).finish()
            }
            JobAction::SetAttributes { path, .. } => {
                f.debug_struct("SetAttributes").field("path", path).finish()
            }
        }
    }
}

/// State the pool stamps onto a job when it is enqueued.
#[derive(Clone)]
pub(crate) struct JobContext {
    pub(crate) observer: Arc<dyn Observer>,
    pub(crate) retry_limit: u32,
    pub(crate) buffer_size: usize,
}

impl Default for JobContext {
    fn default() -> Self {
        JobContext {
            observer: Arc::new(NoopObserver),
            retry_limit: DEFAULT_MAX_RETRY_ATTEMPTS,
            buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// A unit of work executed by the worker pool.
pub struct Job {
    id: Uuid,
    action: JobAction,
    priority: i32,
    retry_count: u32,
    created_at: DateTime<Utc>,
    context: JobContext,
}

impl Job {
    /// Create a job for an arbitrary action with priority 0.
    pub fn new(action: JobAction) -> Self {
        Job {
            id: Uuid::new_v4(),
            action,
            priority: 0,
            retry_count: 0,
            created_at: Utc::now(),
            context: JobContext::default(),
        }
    }

    /// Copy `source` to `target`.
    pub fn copy(source: impl Into<PathBuf>, target: impl Into<PathBuf>, options: CopyOptions) -> Self {
        Job::new(JobAction::Copy {
            source: source.into(),
            target: target.into(),
            options,
        })
    }

    /// Write an in-memory buffer to `target`.
    pub fn create(data: impl Into<Arc<[u8]>>, target: impl Into<PathBuf>, options: CopyOptions) -> Self {
        Job::new(JobAction::Create {
            data: data.into(),
            target: target.into(),
            options,
        })
    }

    pub fn create_directory(path: impl Into<PathBuf>) -> Self {
        Job::new(JobAction::DirectoryCreate { path: path.into() })
    }

    pub fn set_timestamps(path: impl Into<PathBuf>, times: FileTimes) -> Self {
        Job::new(JobAction::SetTimestamps {
            path: path.into(),
            times,
        })
    }

    pub fn set_attributes(path: impl Into<PathBuf>, attributes: FileAttributes) -> Self {
        Job::new(JobAction::SetAttributes {
            path: path.into(),
            attributes,
        })
    }

    /// Set the priority (higher is served first).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.action.kind()
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Number of failed attempts so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The path this job mutates.
    pub fn target(&self) -> &Path {
        match &self.action {
            JobAction::Copy { target, .. } | JobAction::Create { target, .. } => target,
            JobAction::DirectoryCreate { path }
            | JobAction::SetTimestamps { path, .. }
            | JobAction::SetAttributes { path, .. } => path,
        }
    }

    /// The source file, for copy jobs.
    pub fn source(&self) -> Option<&Path> {
        match &self.action {
            JobAction::Copy { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Stamp the pool's observer, retry limit and buffer size onto the job,
    /// replacing whatever it carried before.
    pub(crate) fn attach(&mut self, context: JobContext) {
        self.context = context;
    }

    pub(crate) fn increment_retry_count(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    pub(crate) fn observer(&self) -> &Arc<dyn Observer> {
        &self.context.observer
    }

    /// Execute the job once.
    ///
    /// Notifies "started", runs the implementation and notifies "ended" on
    /// success. On failure it notifies "error" and returns the error without
    /// notifying "ended". Failures that retrying cannot fix pin the retry count
    /// to the retry limit so the worker abandons the job immediately.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let observer = Arc::clone(&self.context.observer);
        let started_at = Utc::now();
        observer.on_job_started(self, started_at);

        match self.implementation() {
            Ok(()) => {
                let timing = JobTiming {
                    started_at,
                    ended_at: Utc::now(),
                };
                observer.on_job_ended(self, &timing);
                Ok(())
            }
            Err(err) => {
                if !err.is_retryable() {
                    self.retry_count = self.retry_count.max(self.context.retry_limit);
                }
                observer.on_job_error(self, &err);
                Err(err)
            }
        }
    }

    fn implementation(&self) -> Result<(), EngineError> {
        match &self.action {
            JobAction::Copy {
                source,
                target,
                options,
            } => self.copy_file(source, target, options),
            JobAction::Create {
                data,
                target,
                options,
            } => self.create_file(data, target, options),
            JobAction::DirectoryCreate { path } => self.create_dir(path),
            JobAction::SetTimestamps { path, times } => {
                let observer = &self.context.observer;
                observer.on_timestamps_set_started(self, path);
                fs_ops::apply_file_times(path, times)?;
                observer.on_timestamps_set_finished(self, path);
                Ok(())
            }
            JobAction::SetAttributes { path, attributes } => {
                let observer = &self.context.observer;
                observer.on_attributes_set_started(self, path);
                fs_ops::apply_attributes(path, attributes)?;
                observer.on_attributes_set_finished(self, path);
                Ok(())
            }
        }
    }

    fn copy_file(&self, source: &Path, target: &Path, options: &CopyOptions) -> Result<(), EngineError> {
        let observer = &self.context.observer;

        match fs_ops::entry_kind(source)? {
            Some(EntryKind::File) => {}
            Some(EntryKind::Directory) => {
                return Err(EngineError::UnmatchedEntryType {
                    path: source.to_path_buf(),
                    expected: EntryKind::File,
                })
            }
            None => {
                return Err(EngineError::PathNotFound {
                    path: source.to_path_buf(),
                })
            }
        }
        let fresh = self.check_target(target, options)?;
        if options.create_parent_dirs {
            self.prepare_parent(target)?;
        }

        let src_file = File::open(source).map_err(|e| EngineError::from_io(source, e))?;
        let total_bytes = src_file
            .metadata()
            .map_err(|e| EngineError::from_io(source, e))?
            .len();
        // Opened outside the cleanup path: losing a create race must not delete
        // the winner's file
        let dst_file = open_target(target, total_bytes, options.overwrite)?;

        observer.on_file_copy_started(self, source, target);
        let transferred = self
            .write_copy(source, target, src_file, dst_file, total_bytes, options)
            .map_err(|err| {
            observer.on_file_copy_error(self, source, target, &err);
            discard_partial(target, fresh, err)
        })?;
        observer.on_file_copy_finished(self, source, target, transferred);
        Ok(())
    }

    /// Stream `source` into `target`, then verify and copy metadata.
    fn write_copy(
        &self,
        source: &Path,
        target: &Path,
        mut src_file: File,
        mut dst_file: File,
        total_bytes: u64,
        options: &CopyOptions,
    ) -> Result<u64, EngineError> {
        let observer = &self.context.observer;

        let mut hasher = options.verify.map(checksums::create_hasher);
        let mut buffer = vec![0u8; self.context.buffer_size.max(1)];
        let started = Instant::now();
        let mut transferred: u64 = 0;

        loop {
            let n = match src_file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EngineError::from_io(source, e)),
            };
            dst_file
                .write_all(&buffer[..n])
                .map_err(|e| EngineError::from_io(target, e))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..n]);
            }
            transferred += n as u64;

            observer.on_file_copy_progress(
                self,
                &TransferProgress {
                    source: Some(source.to_path_buf()),
                    target: target.to_path_buf(),
                    total_bytes,
                    transferred_bytes: transferred,
                    chunk_bytes: n as u64,
                    elapsed: started.elapsed(),
                },
            );
        }

        // The source shrank while we were reading
        if transferred < total_bytes {
            dst_file
                .set_len(transferred)
                .map_err(|e| EngineError::from_io(target, e))?;
        }
        drop(dst_file);

        if let Some(hasher) = hasher {
            checksums::verify_target(target, &hasher.finalize(), self.context.buffer_size)?;
        }
        if options.copy_timestamps {
            let times = fs_ops::read_file_times(source)?;
            fs_ops::apply_file_times(target, &times)?;
        }
        if options.copy_attributes {
            let attributes = fs_ops::read_attributes(source)?;
            fs_ops::apply_attributes(target, &attributes)?;
        }
        Ok(transferred)
    }

    fn create_file(&self, data: &[u8], target: &Path, options: &CopyOptions) -> Result<(), EngineError> {
        let observer = &self.context.observer;

        let fresh = self.check_target(target, options)?;
        if options.create_parent_dirs {
            self.prepare_parent(target)?;
        }

        let dst_file = open_target(target, data.len() as u64, options.overwrite)?;

        observer.on_file_create_started(self, target);
        let transferred = self.write_create(data, target, dst_file, options).map_err(|err| {
            observer.on_file_create_error(self, target, &err);
            discard_partial(target, fresh, err)
        })?;
        observer.on_file_create_finished(self, target, transferred);
        Ok(())
    }

    fn write_create(
        &self,
        data: &[u8],
        target: &Path,
        mut dst_file: File,
        options: &CopyOptions,
    ) -> Result<u64, EngineError> {
        let observer = &self.context.observer;
        let total_bytes = data.len() as u64;
        let started = Instant::now();
        let mut transferred: u64 = 0;

        for chunk in data.chunks(self.context.buffer_size.max(1)) {
            dst_file
                .write_all(chunk)
                .map_err(|e| EngineError::from_io(target, e))?;
            transferred += chunk.len() as u64;

            observer.on_file_create_progress(
                self,
                &TransferProgress {
                    source: None,
                    target: target.to_path_buf(),
                    total_bytes,
                    transferred_bytes: transferred,
                    chunk_bytes: chunk.len() as u64,
                    elapsed: started.elapsed(),
                },
            );
        }
        drop(dst_file);

        if let Some(algorithm) = options.verify {
            let expected = checksums::compute_bytes_checksum(data, algorithm);
            checksums::verify_target(target, &expected, self.context.buffer_size)?;
        }
        Ok(transferred)
    }

    fn create_dir(&self, path: &Path) -> Result<(), EngineError> {
        let observer = &self.context.observer;
        observer.on_directory_create_started(self, path);

        let result = match fs_ops::entry_kind(path) {
            Ok(Some(EntryKind::Directory)) => Ok(()),
            Ok(Some(EntryKind::File)) => Err(EngineError::UnmatchedEntryType {
                path: path.to_path_buf(),
                expected: EntryKind::Directory,
            }),
            Ok(None) => fs::create_dir_all(path).map_err(|e| EngineError::from_io(path, e)),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                observer.on_directory_create_finished(self, path);
                Ok(())
            }
            Err(err) => {
                observer.on_directory_create_error(self, path, &err);
                Err(err)
            }
        }
    }

    /// Reject an existing target unless overwriting is allowed.
    /// Returns true when the target does not exist yet.
    fn check_target(&self, target: &Path, options: &CopyOptions) -> Result<bool, EngineError> {
        match fs_ops::entry_kind(target)? {
            None => Ok(true),
            Some(EntryKind::Directory) => Err(EngineError::UnmatchedEntryType {
                path: target.to_path_buf(),
                expected: EntryKind::File,
            }),
            Some(EntryKind::File) if options.overwrite => Ok(false),
            Some(EntryKind::File) => Err(EngineError::TargetExists {
                path: target.to_path_buf(),
            }),
        }
    }

    /// Create the target's parent directory, notifying only if it was missing.
    fn prepare_parent(&self, target: &Path) -> Result<(), EngineError> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => return Ok(()),
        };
        if fs_ops::entry_kind(parent)?.is_some() {
            // Still validates that the parent is a directory
            fs_ops::ensure_parent_dir_exists(target)?;
            return Ok(());
        }

        let observer = &self.context.observer;
        observer.on_directory_create_started(self, parent);
        fs_ops::ensure_parent_dir_exists(target)?;
        observer.on_directory_create_finished(self, parent);
        Ok(())
    }
}

/// Open a target for writing and pre-size it.
///
/// Without `overwrite` the file must not exist yet; the create is atomic, so a
/// concurrent writer to the same path gets `TargetExists`.
fn open_target(target: &Path, len: u64, overwrite: bool) -> Result<File, EngineError> {
    let mut open = OpenOptions::new();
    open.write(true);
    if overwrite {
        open.create(true).truncate(true);
    } else {
        open.create_new(true);
    }
    let file = open.open(target).map_err(|e| EngineError::from_io(target, e))?;
    file.set_len(len).map_err(|e| EngineError::from_io(target, e))?;
    Ok(file)
}

/// Remove a half-written target this attempt created, so a retry does not
/// trip over it as an existing file.
fn discard_partial(target: &Path, fresh: bool, err: EngineError) -> EngineError {
    if fresh {
        if let Err(e) = fs::remove_file(target) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(target = %target.display(), error = %e, "failed to remove partial target");
            }
        }
    }
    err
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumAlgorithm;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    // Test helper: records observer calls in order
    #[derive(Default)]
    struct RecordingObserver {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn get_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Observer for RecordingObserver {
        fn on_job_started(&self, _job: &Job, _started_at: DateTime<Utc>) {
            self.push("job_started".to_string());
        }

        fn on_job_ended(&self, _job: &Job, _timing: &JobTiming) {
            self.push("job_ended".to_string());
        }

        fn on_job_error(&self, _job: &Job, error: &EngineError) {
            self.push(format!("job_error({})", error));
        }

        fn on_directory_create_started(&self, _job: &Job, _path: &Path) {
            self.push("dir_started".to_string());
        }

        fn on_directory_create_finished(&self, _job: &Job, _path: &Path) {
            self.push("dir_finished".to_string());
        }

        fn on_directory_create_error(&self, _job: &Job, _path: &Path, _error: &EngineError) {
            self.push("dir_error".to_string());
        }

        fn on_file_copy_started(&self, _job: &Job, _source: &Path, _target: &Path) {
            self.push("copy_started".to_string());
        }

        fn on_file_copy_progress(&self, _job: &Job, progress: &TransferProgress) {
            self.push(format!(
                "copy_progress({}/{})",
                progress.transferred_bytes, progress.total_bytes
            ));
        }

        fn on_file_copy_finished(&self, _job: &Job, _source: &Path, _target: &Path, bytes: u64) {
            self.push(format!("copy_finished({})", bytes));
        }

        fn on_file_create_finished(&self, _job: &Job, _target: &Path, bytes: u64) {
            self.push(format!("create_finished({})", bytes));
        }

        fn on_timestamps_set_finished(&self, _job: &Job, _path: &Path) {
            self.push("timestamps_finished".to_string());
        }
    }

    fn attach(job: &mut Job, observer: &Arc<RecordingObserver>, buffer_size: usize) {
        job.attach(JobContext {
            observer: observer.clone(),
            retry_limit: 3,
            buffer_size,
        });
    }

    #[test]
    fn test_copy_streams_in_chunks_and_reports_progress() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.bin");
        let dst = temp_dir.path().join("dest.bin");
        let data = vec![7u8; 2500];
        fs::write(&src, &data).expect("Failed to write source");

        let observer = Arc::new(RecordingObserver::default());
        let mut job = Job::copy(&src, &dst, CopyOptions::default());
        attach(&mut job, &observer, 1024);

        job.run().expect("Copy should succeed");

        assert_eq!(fs::read(&dst).expect("Failed to read dest"), data);
        assert_eq!(
            observer.get_calls(),
            vec![
                "job_started",
                "copy_started",
                "copy_progress(1024/2500)",
                "copy_progress(2048/2500)",
                "copy_progress(2500/2500)",
                "copy_finished(2500)",
                "job_ended",
            ]
        );
    }

    #[test]
    fn test_copy_to_existing_target_pins_retry_count() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("dest.txt");
        fs::write(&src, b"source").expect("Failed to write source");
        fs::write(&dst, b"existing").expect("Failed to write dest");

        let observer = Arc::new(RecordingObserver::default());
        let mut job = Job::copy(&src, &dst, CopyOptions::default());
        attach(&mut job, &observer, 1024);

        let result = job.run();
        assert!(matches!(result, Err(EngineError::TargetExists { .. })));
        assert_eq!(job.retry_count(), 3);
        assert_eq!(fs::read_to_string(&dst).expect("Failed to read dest"), "existing");

        let calls = observer.get_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("job_error(Target already exists"));
        assert!(!calls.iter().any(|c| c == "job_ended"));
    }

    #[test]
    fn test_copy_overwrites_when_allowed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("dest.txt");
        fs::write(&src, b"source").expect("Failed to write source");
        fs::write(&dst, b"existing and longer").expect("Failed to write dest");

        let options = CopyOptions {
            overwrite: true,
            ..CopyOptions::default()
        };
        let mut job = Job::copy(&src, &dst, options);
        job.run().expect("Overwrite should succeed");

        assert_eq!(fs::read_to_string(&dst).expect("Failed to read dest"), "source");
    }

    #[test]
    fn test_copy_missing_source_is_retryable() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut job = Job::copy(
            temp_dir.path().join("missing"),
            temp_dir.path().join("dest"),
            CopyOptions::default(),
        );

        let result = job.run();
        assert!(matches!(result, Err(EngineError::PathNotFound { .. })));
        assert_eq!(job.retry_count(), 0);
    }

    #[test]
    fn test_copy_creates_missing_parent_and_notifies() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("a").join("b").join("dest.txt");
        fs::write(&src, b"hello").expect("Failed to write source");

        let observer = Arc::new(RecordingObserver::default());
        let mut job = Job::copy(&src, &dst, CopyOptions::default());
        attach(&mut job, &observer, 1024);
        job.run().expect("Copy should succeed");

        assert!(dst.exists());
        let calls = observer.get_calls();
        assert_eq!(&calls[1..3], &["dir_started", "dir_finished"]);
    }

    #[test]
    fn test_copy_without_parent_creation_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        fs::write(&src, b"hello").expect("Failed to write source");

        let options = CopyOptions {
            create_parent_dirs: false,
            ..CopyOptions::default()
        };
        let mut job = Job::copy(&src, temp_dir.path().join("missing").join("dest.txt"), options);
        assert!(matches!(job.run(), Err(EngineError::PathNotFound { .. })));
    }

    #[test]
    fn test_copy_timestamps_without_attributes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("dest.txt");
        fs::write(&src, b"hello").expect("Failed to write source");

        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_200_000_000);
        fs_ops::apply_file_times(
            &src,
            &FileTimes {
                accessed: None,
                modified: Some(mtime),
            },
        )
        .expect("Failed to set source mtime");
        fs_ops::apply_attributes(
            &src,
            &FileAttributes {
                readonly: true,
                unix_mode: None,
            },
        )
        .expect("Failed to make source readonly");

        let options = CopyOptions {
            copy_timestamps: true,
            copy_attributes: false,
            ..CopyOptions::default()
        };
        let mut job = Job::copy(&src, &dst, options);
        job.run().expect("Copy should succeed");

        let times = fs_ops::read_file_times(&dst).expect("Failed to read dest times");
        assert_eq!(times.modified, Some(mtime));
        assert!(!fs_ops::read_attributes(&dst).expect("Failed to read attributes").readonly);
    }

    #[test]
    fn test_copy_with_verification() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("dest.txt");
        fs::write(&src, b"test content").expect("Failed to write source");

        let options = CopyOptions {
            verify: Some(ChecksumAlgorithm::Sha256),
            ..CopyOptions::default()
        };
        let mut job = Job::copy(&src, &dst, options);
        job.run().expect("Verified copy should succeed");
        assert_eq!(fs::read(&dst).expect("Failed to read dest"), b"test content");
    }

    #[test]
    fn test_create_writes_buffer() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("nested").join("created.txt");

        let observer = Arc::new(RecordingObserver::default());
        let mut job = Job::create(b"generated".to_vec(), &dst, CopyOptions::default());
        attach(&mut job, &observer, 4);
        job.run().expect("Create should succeed");

        assert_eq!(fs::read_to_string(&dst).expect("Failed to read dest"), "generated");
        assert!(observer.get_calls().contains(&"create_finished(9)".to_string()));
    }

    #[test]
    fn test_directory_create_is_idempotent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dir = temp_dir.path().join("x").join("y");

        Job::create_directory(&dir).run().expect("First create should succeed");
        Job::create_directory(&dir).run().expect("Second create should succeed");
        assert!(dir.is_dir());
    }

    #[test]
    fn test_directory_create_over_file_is_unmatched() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file");
        fs::write(&path, b"x").expect("Failed to write file");

        let observer = Arc::new(RecordingObserver::default());
        let mut job = Job::create_directory(&path);
        attach(&mut job, &observer, 1024);
        let result = job.run();
        assert!(matches!(
            result,
            Err(EngineError::UnmatchedEntryType {
                expected: EntryKind::Directory,
                ..
            })
        ));
        // Retrying cannot help
        assert_eq!(job.retry_count(), 3);

        let calls = observer.get_calls();
        assert_eq!(&calls[..3], &["job_started", "dir_started", "dir_error"]);
        assert!(calls[3].starts_with("job_error("));
    }

    #[test]
    fn test_set_timestamps_applies_times() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file");
        fs::write(&path, b"x").expect("Failed to write file");

        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        let observer = Arc::new(RecordingObserver::default());
        let mut job = Job::set_timestamps(
            &path,
            FileTimes {
                accessed: Some(mtime),
                modified: Some(mtime),
            },
        );
        attach(&mut job, &observer, 1024);
        job.run().expect("SetTimestamps should succeed");

        let times = fs_ops::read_file_times(&path).expect("Failed to read times");
        assert_eq!(times.modified, Some(mtime));
        assert_eq!(
            observer.get_calls(),
            vec!["job_started", "timestamps_finished", "job_ended"]
        );
    }

    #[test]
    fn test_set_attributes_on_missing_path() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut job = Job::set_attributes(temp_dir.path().join("missing"), FileAttributes::default());
        assert!(matches!(job.run(), Err(EngineError::PathNotFound { .. })));
    }

    #[test]
    fn test_open_target_without_overwrite_never_truncates() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("taken.bin");
        fs::write(&target, b"first writer").expect("Failed to write target");

        let result = open_target(&target, 0, false);
        assert!(matches!(result, Err(EngineError::TargetExists { .. })));
        assert_eq!(fs::read(&target).expect("Failed to read target"), b"first writer");

        open_target(&target, 3, true).expect("Overwrite open should succeed");
        assert_eq!(fs::metadata(&target).expect("Failed to stat target").len(), 3);
    }

    #[test]
    fn test_failed_attempt_removes_only_targets_it_created() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let created = temp_dir.path().join("created.bin");
        let preexisting = temp_dir.path().join("preexisting.bin");
        fs::write(&created, b"half").expect("Failed to write file");
        fs::write(&preexisting, b"half").expect("Failed to write file");

        let err = discard_partial(
            &created,
            true,
            EngineError::ChecksumMismatch {
                path: created.clone(),
            },
        );
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
        assert!(!created.exists());

        discard_partial(
            &preexisting,
            false,
            EngineError::PathNotFound {
                path: preexisting.clone(),
            },
        );
        assert!(preexisting.exists());
    }

    #[test]
    fn test_job_accessors() {
        let job = Job::copy("a", "b", CopyOptions::default()).with_priority(5);
        assert_eq!(job.kind(), JobKind::Copy);
        assert_eq!(job.priority(), 5);
        assert_eq!(job.retry_count(), 0);
        assert_eq!(job.source(), Some(Path::new("a")));
        assert_eq!(job.target(), Path::new("b"));
        assert!(format!("{:?}", job).contains("Copy"));
    }
}
