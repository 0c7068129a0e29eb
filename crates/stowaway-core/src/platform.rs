//! Host platform queries
//!
//! The facade asks the host two questions: is the removable root mounted
//! and writable right now, and what pixel density should images be
//! decoded for. Both sit behind traits so hosts (and tests) can answer
//! them their own way.

use std::fs;
use std::path::Path;

/// Mount state of a storage root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Mounted and accepting writes
    MountedWritable,
    /// Mounted, but read-only
    MountedReadOnly,
    /// Not mounted, ejected or otherwise unreachable
    Unavailable,
}

impl MountState {
    /// Only a writable mount is eligible as the preferred root
    pub fn is_writable(self) -> bool {
        matches!(self, MountState::MountedWritable)
    }
}

/// Answers the current mount state of a root directory
///
/// Called on every resolution; implementations must not cache, since
/// removable media can disappear between calls.
pub trait MountProbe: Send + Sync {
    fn mount_state(&self, root: &Path) -> MountState;
}

/// Mount probe that inspects the root on the local filesystem
///
/// A missing root is `Unavailable`; a directory whose permissions deny
/// writing is `MountedReadOnly`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsMountProbe;

impl MountProbe for FsMountProbe {
    fn mount_state(&self, root: &Path) -> MountState {
        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {
                if meta.permissions().readonly() {
                    MountState::MountedReadOnly
                } else {
                    MountState::MountedWritable
                }
            }
            _ => MountState::Unavailable,
        }
    }
}

/// Mount probe that always reports the same state
#[derive(Debug, Clone, Copy)]
pub struct FixedMountState(pub MountState);

impl MountProbe for FixedMountState {
    fn mount_state(&self, _root: &Path) -> MountState {
        self.0
    }
}

/// Answers the display density images are decoded for
pub trait DensityProbe: Send + Sync {
    fn density(&self) -> u32;
}

/// Density probe returning a configured constant
#[derive(Debug, Clone, Copy)]
pub struct FixedDensity(pub u32);

impl DensityProbe for FixedDensity {
    fn density(&self) -> u32 {
        self.0
    }
}
