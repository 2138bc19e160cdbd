//! Filesystem operations module.
//!
//! This module provides the native operations jobs build on:
//! - Enumerating directory trees into (source, target) entries
//! - Creating parent directories on demand
//! - Reading and applying timestamps and attributes
//!
//! Every failure is classified into `EngineError` with the offending path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::warn;

use crate::error::EngineError;
use crate::model::{EntryKind, FileAttributes, FileTimes};

/// One entry produced by `enumerate_tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: EntryKind,
    /// File size in bytes (0 for directories)
    pub size: u64,
}

/// Enumerate the source directory tree and map every entry to its target.
///
/// Directories are listed before their contents. Unreadable subdirectories are
/// logged and skipped; only a failure at the root is an error.
///
/// # Errors
/// Returns `PathNotFound` / `UnmatchedEntryType` / `PermissionDenied` etc. if the
/// root cannot be read as a directory.
pub fn enumerate_tree(source: &Path, target_root: &Path) -> Result<Vec<TreeEntry>, EngineError> {
    match entry_kind(source)? {
        Some(EntryKind::Directory) => {}
        Some(EntryKind::File) => {
            return Err(EngineError::UnmatchedEntryType {
                path: source.to_path_buf(),
                expected: EntryKind::Directory,
            })
        }
        None => {
            return Err(EngineError::PathNotFound {
                path: source.to_path_buf(),
            })
        }
    }

    fn recurse(dir: &Path, target_dir: &Path, items: &mut Vec<TreeEntry>) -> Result<(), EngineError> {
        let entries = fs::read_dir(dir).map_err(|e| EngineError::from_io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::from_io(dir, e))?;
            let entry_path = entry.path();
            let metadata = entry.metadata().map_err(|e| EngineError::from_io(&entry_path, e))?;
            let target = target_dir.join(entry.file_name());

            if metadata.is_dir() {
                items.push(TreeEntry {
                    source: entry_path.clone(),
                    target: target.clone(),
                    kind: EntryKind::Directory,
                    size: 0,
                });

                if let Err(e) = recurse(&entry_path, &target, items) {
                    warn!(path = %entry_path.display(), error = %e, "skipping unreadable directory");
                }
            } else {
                items.push(TreeEntry {
                    source: entry_path,
                    target,
                    kind: EntryKind::File,
                    size: metadata.len(),
                });
            }
        }
        Ok(())
    }

    let mut items = Vec::new();
    recurse(source, target_root, &mut items)?;
    Ok(items)
}

/// Kind of the entry at `path`, or `None` if nothing exists there.
pub fn entry_kind(path: &Path) -> Result<Option<EntryKind>, EngineError> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Ok(Some(EntryKind::Directory)),
        Ok(_) => Ok(Some(EntryKind::File)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::from_io(path, e)),
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// Returns the parent directory if this call created it.
///
/// # Errors
/// `UnmatchedEntryType` if the parent exists as a file, otherwise the
/// classified creation failure.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<Option<PathBuf>, EngineError> {
    let parent = match path.parent() {
        // Skip if parent is empty path (relative root)
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => return Ok(None),
    };

    match entry_kind(parent)? {
        Some(EntryKind::Directory) => Ok(None),
        Some(EntryKind::File) => Err(EngineError::UnmatchedEntryType {
            path: parent.to_path_buf(),
            expected: EntryKind::Directory,
        }),
        None => {
            fs::create_dir_all(parent).map_err(|e| EngineError::from_io(parent, e))?;
            Ok(Some(parent.to_path_buf()))
        }
    }
}

/// Read the access and modification times of an entry.
pub fn read_file_times(path: &Path) -> Result<FileTimes, EngineError> {
    let metadata = fs::metadata(path).map_err(|e| EngineError::from_io(path, e))?;
    Ok(FileTimes {
        accessed: metadata.accessed().ok(),
        modified: metadata.modified().ok(),
    })
}

/// Apply access/modification times; a `None` keeps the entry's current value.
pub fn apply_file_times(path: &Path, times: &FileTimes) -> Result<(), EngineError> {
    let metadata = fs::metadata(path).map_err(|e| EngineError::from_io(path, e))?;

    let atime = match times.accessed {
        Some(t) => FileTime::from_system_time(t),
        None => FileTime::from_last_access_time(&metadata),
    };
    let mtime = match times.modified {
        Some(t) => FileTime::from_system_time(t),
        None => FileTime::from_last_modification_time(&metadata),
    };

    filetime::set_file_times(path, atime, mtime).map_err(|e| EngineError::from_io(path, e))
}

/// Read the attributes of an entry.
pub fn read_attributes(path: &Path) -> Result<FileAttributes, EngineError> {
    let metadata = fs::metadata(path).map_err(|e| EngineError::from_io(path, e))?;
    let permissions = metadata.permissions();

    #[cfg(unix)]
    let unix_mode = {
        use std::os::unix::fs::PermissionsExt;
        Some(permissions.mode() & 0o7777)
    };
    #[cfg(not(unix))]
    let unix_mode = None;

    Ok(FileAttributes {
        readonly: permissions.readonly(),
        unix_mode,
    })
}

/// Apply attributes to an entry.
pub fn apply_attributes(path: &Path, attributes: &FileAttributes) -> Result<(), EngineError> {
    let metadata = fs::metadata(path).map_err(|e| EngineError::from_io(path, e))?;
    let mut permissions = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match attributes.unix_mode {
            Some(mode) => permissions.set_mode(mode),
            None => permissions.set_readonly(attributes.readonly),
        }
    }
    #[cfg(not(unix))]
    permissions.set_readonly(attributes.readonly);

    fs::set_permissions(path, permissions).map_err(|e| EngineError::from_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_enumerate_flat_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");

        let mut file1 = fs::File::create(src.join("file1.txt")).expect("Failed to create file1");
        file1.write_all(b"test data 1").expect("Failed to write file1");
        drop(file1);

        let mut file2 = fs::File::create(src.join("file2.txt")).expect("Failed to create file2");
        file2.write_all(b"test data 2").expect("Failed to write file2");
        drop(file2);

        let dst = temp_dir.path().join("dst");
        let items = enumerate_tree(&src, &dst).expect("Failed to enumerate");

        let files: Vec<_> = items.iter().filter(|e| e.kind == EntryKind::File).collect();
        assert_eq!(files.len(), 2, "Expected 2 files, got {}", files.len());

        let total_size: u64 = files.iter().map(|e| e.size).sum();
        assert_eq!(total_size, 22);
        assert!(files.iter().all(|e| e.target.starts_with(&dst)));
    }

    #[test]
    fn test_enumerate_lists_directories_before_contents() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let subdir = src.join("subdir");
        fs::create_dir_all(&subdir).expect("Failed to create subdir");
        fs::write(subdir.join("file2.txt"), b"data2").expect("Failed to write file2");

        let dst = temp_dir.path().join("dst");
        let items = enumerate_tree(&src, &dst).expect("Failed to enumerate");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, EntryKind::Directory);
        assert_eq!(items[0].target, dst.join("subdir"));
        assert_eq!(items[1].target, dst.join("subdir").join("file2.txt"));
    }

    #[test]
    fn test_enumerate_rejects_missing_or_file_root() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let dst = temp_dir.path().join("dst");

        let result = enumerate_tree(&temp_dir.path().join("nonexistent"), &dst);
        assert!(matches!(result, Err(EngineError::PathNotFound { .. })));

        let file = temp_dir.path().join("file.txt");
        fs::write(&file, b"x").expect("Failed to write file");
        let result = enumerate_tree(&file, &dst);
        assert!(matches!(
            result,
            Err(EngineError::UnmatchedEntryType {
                expected: EntryKind::Directory,
                ..
            })
        ));
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        let created = ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert_eq!(created, Some(temp_dir.path().join("subdir")));
        assert!(temp_dir.path().join("subdir").is_dir());

        // Second call finds it in place
        let created = ensure_parent_dir_exists(&path).expect("Failed to check parent");
        assert_eq!(created, None);
    }

    #[test]
    fn test_ensure_parent_dir_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("Failed to write file");

        let result = ensure_parent_dir_exists(&blocker.join("file.txt"));
        assert!(matches!(result, Err(EngineError::UnmatchedEntryType { .. })));
    }

    #[test]
    fn test_apply_file_times_keeps_unset_values() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, b"x").expect("Failed to write file");

        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        apply_file_times(
            &path,
            &FileTimes {
                accessed: None,
                modified: Some(modified),
            },
        )
        .expect("Failed to apply times");

        let times = read_file_times(&path).expect("Failed to read times");
        assert_eq!(times.modified, Some(modified));
    }

    #[test]
    fn test_apply_readonly_attribute() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("file.txt");
        fs::write(&path, b"x").expect("Failed to write file");

        apply_attributes(
            &path,
            &FileAttributes {
                readonly: true,
                unix_mode: None,
            },
        )
        .expect("Failed to apply attributes");
        assert!(read_attributes(&path).expect("Failed to read attributes").readonly);

        apply_attributes(&path, &FileAttributes::default()).expect("Failed to clear readonly");
        assert!(!read_attributes(&path).expect("Failed to read attributes").readonly);
    }
}
