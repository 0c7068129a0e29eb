//! Per-category usage statistics

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// File count and size of everything under a category root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    pub root: PathBuf,
    pub file_count: u64,
    pub total_bytes: u64,
}

impl StorageStats {
    /// Walk `root` recursively; symbolic links are counted, not followed
    pub fn collect(root: &Path) -> StorageResult<Self> {
        let mut stats = Self {
            root: root.to_path_buf(),
            file_count: 0,
            total_bytes: 0,
        };
        stats.walk(root)?;
        Ok(stats)
    }

    fn walk(&mut self, dir: &Path) -> StorageResult<()> {
        let entries =
            fs::read_dir(dir).map_err(|e| StorageError::from_read_io(e, dir.to_path_buf()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::from_read_io(e, dir.to_path_buf()))?;
            let meta = entry
                .path()
                .symlink_metadata()
                .map_err(|e| StorageError::from_read_io(e, entry.path()))?;
            if meta.is_dir() {
                self.walk(&entry.path())?;
            } else {
                self.file_count += 1;
                self.total_bytes += meta.len();
            }
        }
        Ok(())
    }

    /// Size formatted for people, e.g. `1.5 MB`
    pub fn total_size_human(&self) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut size = self.total_bytes as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", self.total_bytes, UNITS[0])
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }
}
