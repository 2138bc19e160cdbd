//! Engine configuration.
//!
//! `PoolConfig` sizes the worker pool and sets its retry and buffer limits;
//! `EngineConfig` bundles it with the default `CopyOptions` and can be loaded
//! from a TOML file. Out-of-range values are clamped, never rejected.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::job::Job;
use crate::model::CopyOptions;

/// Default number of attempts per job.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
/// Default I/O chunk size (32 KiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 32 * 1024;
/// Smallest accepted I/O chunk size.
pub const MIN_BUFFER_SIZE: usize = 1024;

/// Comparator deciding queue order; `Ordering::Less` means "serve first".
pub type JobComparator = Arc<dyn Fn(&Job, &Job) -> Ordering + Send + Sync>;

/// How the job queue orders pending jobs.
///
/// Sorting is stable, so jobs that compare equal keep their insertion order.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingPolicy {
    /// Higher priority first
    #[default]
    Priority,
    /// Strict insertion order
    Fifo,
    /// Caller-supplied comparator
    #[serde(skip)]
    Custom(JobComparator),
}

impl OrderingPolicy {
    /// The comparator to sort with, or `None` for insertion order.
    pub(crate) fn comparator(&self) -> Option<JobComparator> {
        match self {
            OrderingPolicy::Priority => Some(Arc::new(|a: &Job, b: &Job| b.priority().cmp(&a.priority()))),
            OrderingPolicy::Fifo => None,
            OrderingPolicy::Custom(cmp) => Some(Arc::clone(cmp)),
        }
    }
}

impl fmt::Debug for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingPolicy::Priority => write!(f, "Priority"),
            OrderingPolicy::Fifo => write!(f, "Fifo"),
            OrderingPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads started by `WorkerPool::start`
    pub workers: usize,
    /// Attempts per job before it is abandoned (>= 1)
    pub max_retry_attempts: u32,
    /// I/O chunk size in bytes (>= 1024)
    pub max_buffer_size: usize,
    pub ordering: OrderingPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            ordering: OrderingPolicy::Priority,
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    /// Copy of this configuration with every value clamped into range.
    pub fn normalized(&self) -> Self {
        Self {
            workers: self.workers.max(1),
            max_retry_attempts: clamp_retry_attempts(self.max_retry_attempts),
            max_buffer_size: clamp_buffer_size(self.max_buffer_size),
            ordering: self.ordering.clone(),
        }
    }
}

pub(crate) fn clamp_retry_attempts(attempts: u32) -> u32 {
    attempts.max(1)
}

pub(crate) fn clamp_buffer_size(bytes: usize) -> usize {
    bytes.max(MIN_BUFFER_SIZE)
}

/// Complete engine configuration as read from a TOML file.
///
/// ```toml
/// [pool]
/// workers = 8
/// max_retry_attempts = 5
/// ordering = "fifo"
///
/// [copy]
/// overwrite = true
/// verify = "blake3"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub copy: CopyOptions,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Config {
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumAlgorithm;

    #[test]
    fn test_normalized_clamps_values() {
        let config = PoolConfig::default()
            .with_workers(0)
            .with_max_retry_attempts(0)
            .with_max_buffer_size(10)
            .normalized();

        assert_eq!(config.workers, 1);
        assert_eq!(config.max_retry_attempts, 1);
        assert_eq!(config.max_buffer_size, MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert!(config.workers >= 1);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.max_buffer_size, 32 * 1024);
        assert!(matches!(config.ordering, OrderingPolicy::Priority));
    }

    #[test]
    fn test_parse_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [pool]
            workers = 2
            max_retry_attempts = 5
            ordering = "fifo"

            [copy]
            overwrite = true
            copy_timestamps = true
            verify = "blake3"
            "#,
        )
        .expect("Failed to parse config");

        assert_eq!(config.pool.workers, 2);
        assert_eq!(config.pool.max_retry_attempts, 5);
        assert_eq!(config.pool.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
        assert!(matches!(config.pool.ordering, OrderingPolicy::Fifo));
        assert!(config.copy.overwrite);
        assert!(config.copy.copy_timestamps);
        assert!(!config.copy.copy_attributes);
        assert!(config.copy.create_parent_dirs);
        assert_eq!(config.copy.verify, Some(ChecksumAlgorithm::Blake3));
    }

    #[test]
    fn test_parse_toml_rejects_garbage() {
        let result = EngineConfig::from_toml_str("[pool]\nworkers = \"many\"");
        assert!(matches!(result, Err(EngineError::Config { .. })));
    }

    #[test]
    fn test_priority_comparator_orders_descending() {
        let cmp = OrderingPolicy::Priority.comparator().expect("Priority has a comparator");
        let low = Job::create_directory("a").with_priority(0);
        let high = Job::create_directory("b").with_priority(5);
        assert_eq!(cmp(&high, &low), Ordering::Less);
        assert!(OrderingPolicy::Fifo.comparator().is_none());
    }
}
