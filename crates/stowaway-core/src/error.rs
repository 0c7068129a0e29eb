//! Storage error handling
//!
//! Every primitive in this crate returns a [`StorageResult`]. Nothing is
//! surfaced as a panic: raw I/O, parse and codec failures are classified
//! into [`StorageError`] variants whose `Display` text is the
//! human-readable failure message handed to completion callbacks.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::io::JsonShape;
use crate::sampler::ImageEncoding;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Target cannot be written (read-only mount or read-only file)
    #[error("Target '{path}' is not writable")]
    NotWritableTarget { path: PathBuf },

    /// Failed to create a storage directory
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permission denied accessing path
    #[error("Permission denied: cannot access '{path}'. Check file permissions.")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error(
        "Disk full or quota exceeded while writing to '{path}'. Free up disk space and try again."
    )]
    DiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read file
    #[error("Failed to read '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write file
    #[error("Failed to write '{path}': {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File not found (when expected to exist)
    #[error("File not found: '{path}'")]
    NotFound { path: PathBuf },

    /// Content is not valid JSON
    #[error("Invalid JSON in '{path}': {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON parsed, but into the other document shape
    #[error("Expected a JSON {expected} in '{path}', found {found}")]
    ShapeMismatch {
        path: PathBuf,
        expected: JsonShape,
        found: &'static str,
    },

    /// Directory operation applied to something that is not a directory
    #[error("'{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// Some entries survived a directory erase
    #[error("Could not remove {failed} of the entries under '{path}'")]
    EraseIncomplete { path: PathBuf, failed: usize },

    /// Image could not be decoded
    #[error("Failed to decode image from {source_name}: {details}")]
    Decode {
        source_name: String,
        details: String,
    },

    /// Image could not be encoded
    #[error("Failed to encode {format} image: {details}")]
    Encode {
        format: ImageEncoding,
        details: String,
    },

    /// Target path is malformed or escapes its storage root
    #[error("Invalid storage target '{path}': {reason}")]
    InvalidTarget { path: PathBuf, reason: &'static str },

    /// Operation was cancelled before it started
    #[error("Operation cancelled before it started")]
    Cancelled,

    /// Runtime went away before the outcome was delivered
    #[error("Operation interrupted: the runtime shut down before it completed")]
    Interrupted,

    /// Operation panicked while running
    #[error("Operation panicked: {0}")]
    Panicked(String),

    /// Background dispatch requested without a runtime to run on
    #[error("No async runtime available for background dispatch")]
    NoRuntime,

    /// A process-wide facade was already installed
    #[error("A process-wide storage facade is already installed")]
    AlreadyInstalled,

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Create an error from an I/O error with path context
    ///
    /// Classifies the error based on its kind (permission, disk full, etc.).
    /// Unclassified errors become `WriteError`; use [`StorageError::from_read_io`]
    /// on read paths.
    pub fn from_io(error: io::Error, path: PathBuf) -> Self {
        match classify(error, path) {
            Ok(err) => err,
            Err((error, path)) => StorageError::WriteError {
                path,
                source: error,
            },
        }
    }

    /// Like [`StorageError::from_io`], but unclassified errors become `ReadError`
    pub fn from_read_io(error: io::Error, path: PathBuf) -> Self {
        match classify(error, path) {
            Ok(err) => err,
            Err((error, path)) => StorageError::ReadError {
                path,
                source: error,
            },
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::PermissionDenied { .. }
                | StorageError::NotWritableTarget { .. }
                | StorageError::EraseIncomplete { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::PermissionDenied { .. } => {
                Some("Check file and directory permissions. You may need to run with different permissions or change ownership.")
            }
            StorageError::NotWritableTarget { .. } => {
                Some("The storage root is mounted read-only. Remount it or write to internal storage.")
            }
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            StorageError::EraseIncomplete { .. } => {
                Some("Some entries are protected. Fix their permissions and clear the directory again.")
            }
            _ => None,
        }
    }
}

fn classify(error: io::Error, path: PathBuf) -> Result<StorageError, (io::Error, PathBuf)> {
    match error.kind() {
        io::ErrorKind::PermissionDenied => Ok(StorageError::PermissionDenied {
            path,
            source: error,
        }),
        io::ErrorKind::NotFound => Ok(StorageError::NotFound { path }),
        // StorageFull is not stable everywhere; fall back to the message
        _ if is_disk_full_error(&error) => Ok(StorageError::DiskFull {
            path,
            source: error,
        }),
        _ => Err((error, path)),
    }
}

/// Check if an I/O error indicates disk full condition
fn is_disk_full_error(error: &io::Error) -> bool {
    let msg = error.to_string().to_lowercase();
    msg.contains("no space left")
        || msg.contains("disk full")
        || msg.contains("quota exceeded")
        || msg.contains("not enough space")
}

/// Result type for storage operations
///
/// This is the outcome of every primitive: `Ok` for success, `Err` carrying
/// a displayable failure otherwise.
pub type StorageResult<T> = Result<T, StorageError>;
