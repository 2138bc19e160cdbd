//! Error types for the transfer engine.
//!
//! `EngineError` covers two families:
//! - file-system failures raised by a job's implementation (always carrying the
//!   offending path), which the worker loop feeds to the retry coordinator;
//! - structural misuse of the pool or orchestrator (submitting to a closed queue,
//!   waiting before completing, running twice), returned directly to the caller.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::EntryKind;

/// Errors raised by jobs, the job queue, the worker pool and the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The target already exists and overwriting is not allowed.
    ///
    /// Never retried: the failing job pins its retry count to the maximum.
    #[error("Target already exists: {}", path.display())]
    TargetExists { path: PathBuf },

    /// A source or target path does not exist
    #[error("Path not found: {}", path.display())]
    PathNotFound { path: PathBuf },

    /// Path is malformed or otherwise unusable
    #[error("Invalid path: {} ({reason})", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A directory that had to be empty was not
    #[error("Directory not empty: {}", path.display())]
    DirectoryNotEmpty { path: PathBuf },

    /// Access to the path was denied
    #[error("Permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    /// Found a file where a directory was expected, or the reverse
    #[error("Expected a {expected} at {}", path.display())]
    UnmatchedEntryType { path: PathBuf, expected: EntryKind },

    /// Unclassified OS-level failure
    #[error("I/O error on {}: {source}", path.display())]
    Native { path: PathBuf, source: io::Error },

    /// Post-copy verification found differing checksums
    #[error("Checksum mismatch after copy: {}", path.display())]
    ChecksumMismatch { path: PathBuf },

    /// The queue no longer accepts jobs (adding completed)
    #[error("Job queue is closed for adding")]
    AddingCompleted,

    /// Cancellation has been requested on the pool
    #[error("Worker pool has been cancelled")]
    Cancelled,

    /// An argument was outside its accepted range
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// `wait_for_finish` was called before `complete_adding`
    #[error("Adding must be completed before waiting for the pool to finish")]
    NotCompleted,

    /// The pool was never started, so nothing would ever drain the queue
    #[error("Worker pool has not been started")]
    NotStarted,

    /// `start` was called twice
    #[error("Worker pool has already been started")]
    AlreadyStarted,

    /// A transfer was run while another run is in progress
    #[error("Transfer is already running")]
    AlreadyRunning,

    /// A transfer was run after it already finished
    #[error("Transfer has already finished")]
    AlreadyFinished,

    /// The OS refused to spawn a worker thread
    #[error("Failed to spawn worker thread: {source}")]
    WorkerSpawn { source: io::Error },

    /// Configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl EngineError {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(path: impl AsRef<Path>, err: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match err.kind() {
            io::ErrorKind::NotFound => EngineError::PathNotFound { path },
            io::ErrorKind::PermissionDenied => EngineError::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => EngineError::TargetExists { path },
            io::ErrorKind::InvalidInput => EngineError::InvalidPath {
                path,
                reason: err.to_string(),
            },
            _ => match err.raw_os_error() {
                Some(code) if is_dir_not_empty_code(code) => EngineError::DirectoryNotEmpty { path },
                _ => EngineError::Native { path, source: err },
            },
        }
    }

    /// The path this error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::TargetExists { path }
            | Self::PathNotFound { path }
            | Self::InvalidPath { path, .. }
            | Self::DirectoryNotEmpty { path }
            | Self::PermissionDenied { path }
            | Self::UnmatchedEntryType { path, .. }
            | Self::Native { path, .. }
            | Self::ChecksumMismatch { path } => Some(path),
            _ => None,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Native { source, .. } | Self::WorkerSpawn { source } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Whether running the failed job again could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PathNotFound { .. }
                | Self::InvalidPath { .. }
                | Self::DirectoryNotEmpty { .. }
                | Self::PermissionDenied { .. }
                | Self::Native { .. }
                | Self::ChecksumMismatch { .. }
        )
    }
}

#[cfg(unix)]
fn is_dir_not_empty_code(code: i32) -> bool {
    // ENOTEMPTY is 39 on Linux, 66 on the BSDs and macOS
    if cfg!(any(target_os = "macos", target_os = "ios", target_os = "freebsd")) {
        code == 66
    } else {
        code == 39
    }
}

#[cfg(windows)]
fn is_dir_not_empty_code(code: i32) -> bool {
    // ERROR_DIR_NOT_EMPTY
    code == 145
}

#[cfg(not(any(unix, windows)))]
fn is_dir_not_empty_code(_code: i32) -> bool {
    false
}
