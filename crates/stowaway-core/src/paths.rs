//! Storage root resolution
//!
//! Every category (documents, pictures) lives under one of two roots:
//!
//! - **external**: removable storage, preferred whenever it is mounted writable
//! - **internal**: app-private storage, always available
//!
//! Mount state is queried on every call. Removable media can be ejected at
//! any time, so a resolution is never cached.

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::platform::MountProbe;

/// Logical storage bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageCategory {
    Documents,
    Pictures,
}

impl fmt::Display for StorageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageCategory::Documents => write!(f, "documents"),
            StorageCategory::Pictures => write!(f, "pictures"),
        }
    }
}

/// Fully-qualified path data is read from or written to
///
/// Only an address: holding one does not keep anything open.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageTarget(Arc<Path>);

impl StorageTarget {
    /// Wrap an absolute path
    pub fn new(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(StorageError::InvalidTarget {
                path: path.to_path_buf(),
                reason: "storage targets must be absolute",
            });
        }
        Ok(Self(Arc::from(path)))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Child target under this one
    ///
    /// `name` must be a single normal path component.
    pub fn join(&self, name: &str) -> StorageResult<Self> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(Self(Arc::from(self.0.join(name)))),
            _ => Err(StorageError::InvalidTarget {
                path: self.0.join(name),
                reason: "file name must be a single path component",
            }),
        }
    }

    /// Lowercased extension, if any
    pub fn extension(&self) -> Option<String> {
        self.0
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

impl AsRef<Path> for StorageTarget {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Which root a resolution landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    External,
    Internal,
}

/// Resolves category roots, falling back from external to internal storage
#[derive(Clone)]
pub struct PathResolver {
    internal_root: PathBuf,
    external_root: Option<PathBuf>,
    documents_dir: String,
    pictures_dir: String,
    probe: Arc<dyn MountProbe>,
}

impl PathResolver {
    pub fn new(config: &Config, probe: Arc<dyn MountProbe>) -> Self {
        Self {
            internal_root: config.internal_root.clone(),
            external_root: config.external_root.clone(),
            documents_dir: config.category_dir(StorageCategory::Documents).to_string(),
            pictures_dir: config.category_dir(StorageCategory::Pictures).to_string(),
            probe,
        }
    }

    /// Pick the base root for this call
    pub fn active_root(&self) -> (RootKind, &Path) {
        if let Some(ref external) = self.external_root {
            let state = self.probe.mount_state(external);
            if state.is_writable() {
                return (RootKind::External, external.as_path());
            }
            debug!(
                "External root {:?} is {:?}, falling back to internal storage",
                external, state
            );
        }
        (RootKind::Internal, self.internal_root.as_path())
    }

    /// Resolve (and create) the directory for a category
    ///
    /// `sub_path` is an optional relative path below the category directory.
    /// Missing directories are created; a creation failure is returned rather
    /// than swallowed.
    pub fn resolve_root(
        &self,
        category: StorageCategory,
        sub_path: Option<&str>,
    ) -> StorageResult<StorageTarget> {
        let (kind, base) = self.active_root();
        let mut dir = base.join(self.category_dir(category));

        if let Some(sub) = sub_path.filter(|s| !s.is_empty()) {
            validate_relative(sub)?;
            dir.push(sub);
        }

        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
            info!("Created {} directory {:?} on {:?} root", category, dir, kind);
        }

        StorageTarget::new(dir)
    }

    /// Resolve a file target inside a category directory
    pub fn target(
        &self,
        category: StorageCategory,
        sub_path: Option<&str>,
        file_name: &str,
    ) -> StorageResult<StorageTarget> {
        self.resolve_root(category, sub_path)?.join(file_name)
    }

    fn category_dir(&self, category: StorageCategory) -> &str {
        match category {
            StorageCategory::Documents => &self.documents_dir,
            StorageCategory::Pictures => &self.pictures_dir,
        }
    }
}

/// Reject sub-paths that are absolute or climb out of the category root
fn validate_relative(sub: &str) -> StorageResult<()> {
    let escapes = Path::new(sub)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StorageError::InvalidTarget {
            path: PathBuf::from(sub),
            reason: "sub-path must be relative and stay inside its category",
        });
    }
    Ok(())
}
