//! Core data model shared by jobs, the queue and observers.
//!
//! This module defines:
//! - JobKind: the closed set of job types the engine executes
//! - EntryKind: file vs directory, used by type-mismatch errors
//! - FileTimes / FileAttributes: metadata payloads for the set-* jobs
//! - CopyOptions: per-job behavior switches for copy and create jobs
//! - WorkerId, JobTiming, TransferProgress: notification payloads

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;

/// The type tag of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    /// Copy a source file to a target file
    Copy,
    /// Write an in-memory buffer to a target file
    Create,
    /// Create a directory
    DirectoryCreate,
    /// Apply access/modification times to an existing entry
    SetTimestamps,
    /// Apply attributes (read-only flag, permission bits) to an existing entry
    SetAttributes,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Copy => write!(f, "Copy"),
            JobKind::Create => write!(f, "Create"),
            JobKind::DirectoryCreate => write!(f, "DirectoryCreate"),
            JobKind::SetTimestamps => write!(f, "SetTimestamps"),
            JobKind::SetAttributes => write!(f, "SetAttributes"),
        }
    }
}

/// Kind of file-system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

/// Access and modification times to apply to an entry.
///
/// `None` leaves the corresponding time untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
}

/// Attributes to apply to an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// Read-only flag
    pub readonly: bool,
    /// Unix permission bits; takes precedence over `readonly` where supported
    pub unix_mode: Option<u32>,
}

/// Behavior switches for copy and create jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    /// Replace an existing target instead of failing with `TargetExists`
    pub overwrite: bool,
    /// Create the target's parent directory when it is missing
    pub create_parent_dirs: bool,
    /// Copy access/modification times after the data
    pub copy_timestamps: bool,
    /// Copy attributes after the data
    pub copy_attributes: bool,
    /// Verify the written file against the source with this checksum
    pub verify: Option<ChecksumAlgorithm>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            overwrite: false,
            create_parent_dirs: true,
            copy_timestamps: false,
            copy_attributes: false,
            verify: None,
        }
    }
}

/// Identity of a pool worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Start and end timestamps of one successful `Job::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTiming {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl JobTiming {
    /// Wall-clock duration of the run (zero if the clock went backwards).
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }
}

/// Snapshot of a data transfer in progress, emitted after every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Source file (absent for create jobs, whose source is a buffer)
    pub source: Option<PathBuf>,
    pub target: PathBuf,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes written by the chunk that triggered this snapshot
    pub chunk_bytes: u64,
    pub elapsed: Duration,
}

impl TransferProgress {
    /// Completed fraction in `0.0..=1.0`; an empty transfer counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.transferred_bytes as f64 / self.total_bytes as f64
        }
    }
}
