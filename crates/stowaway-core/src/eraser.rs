//! Recursive directory clearing
//!
//! Best effort, depth first: every entry is attempted even after a sibling
//! fails, and the directory passed in is emptied but never removed.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Remove everything inside `dir`, leaving `dir` itself in place
///
/// Fails without touching anything when `dir` is a regular file. When some
/// entries cannot be removed the rest are still deleted and the error
/// reports how many survived. `dir` itself may be a symbolic link to a
/// directory; links found inside it are removed, not followed.
pub fn erase_contents(dir: &Path) -> StorageResult<()> {
    erase_with(dir, &|path: &Path| fs::remove_file(path))
}

/// File removal used for every non-directory entry
type RemoveFile<'a> = &'a dyn Fn(&Path) -> io::Result<()>;

fn erase_with(dir: &Path, remove_file: RemoveFile<'_>) -> StorageResult<()> {
    let meta = fs::metadata(dir).map_err(|e| StorageError::from_read_io(e, dir.to_path_buf()))?;
    if !meta.is_dir() {
        return Err(StorageError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    // The top-level listing must succeed; failures below it are counted
    let entries =
        fs::read_dir(dir).map_err(|e| StorageError::from_read_io(e, dir.to_path_buf()))?;

    let mut failed = 0;
    for entry in entries {
        match entry {
            Ok(entry) => failed += remove_entry(&entry.path(), remove_file),
            Err(e) => {
                warn!("Failed to enumerate entry in {:?}: {}", dir, e);
                failed += 1;
            }
        }
    }

    if failed == 0 {
        debug!("Cleared {:?}", dir);
        Ok(())
    } else {
        warn!("{} entries could not be removed from {:?}", failed, dir);
        Err(StorageError::EraseIncomplete {
            path: dir.to_path_buf(),
            failed,
        })
    }
}

/// Remove one entry, returning how many entries under it survived
fn remove_entry(path: &Path, remove_file: RemoveFile<'_>) -> usize {
    let is_dir = match fs::symlink_metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(e) => {
            warn!("Cannot stat {:?}: {}", path, e);
            return 1;
        }
    };

    if !is_dir {
        return match remove_file(path) {
            Ok(()) => 0,
            Err(e) => {
                warn!("Failed to delete {:?}: {}", path, e);
                1
            }
        };
    }

    let failed = erase_children(path, remove_file);
    if failed > 0 {
        // Not empty, so removing it would fail anyway
        return failed;
    }
    match fs::remove_dir(path) {
        Ok(()) => 0,
        Err(e) => {
            warn!("Failed to remove directory {:?}: {}", path, e);
            1
        }
    }
}

/// Erase a nested directory's children, containing listing errors
fn erase_children(dir: &Path, remove_file: RemoveFile<'_>) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {:?}: {}", dir, e);
            return 1;
        }
    };

    entries
        .map(|entry| match entry {
            Ok(entry) => remove_entry(&entry.path(), remove_file),
            Err(e) => {
                warn!("Failed to enumerate entry in {:?}: {}", dir, e);
                1
            }
        })
        .sum()
}
