//! Blocking text and JSON primitives
//!
//! Whole-value reads and writes, no streaming API. Writes go through a
//! uniquely named sibling temp file that is renamed over the target, so a
//! target always holds one complete write, even when writers race.
//!
//! Reads concatenate lines *without* their terminators. That is lossy
//! (`"a\nb"` reads back as `"ab"`) and callers rely on it, so it is kept.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Size of each chunk written to disk
pub const WRITE_CHUNK_SIZE: usize = 8 * 1024;

/// Top-level shape of a JSON document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

impl JsonShape {
    fn of(value: &Value) -> &'static str {
        match value {
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
        }
    }
}

impl fmt::Display for JsonShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonShape::Object => write!(f, "object"),
            JsonShape::Array => write!(f, "array"),
        }
    }
}

/// Write `content` to `path`, replacing whatever was there
pub fn write_text(path: &Path, content: &str) -> StorageResult<()> {
    write_bytes(path, content.as_bytes())
}

/// Write raw bytes to `path` atomically, in fixed-size chunks
///
/// 1. Stream into a temp file next to the target
/// 2. Sync the temp file
/// 3. Rename it over the target
///
/// The temp file is removed on every failure path.
pub fn write_bytes(path: &Path, data: &[u8]) -> StorageResult<()> {
    // Rename would happily replace a read-only file; honor its permissions
    if let Ok(meta) = fs::metadata(path) {
        if meta.is_dir() {
            return Err(StorageError::InvalidTarget {
                path: path.to_path_buf(),
                reason: "target is a directory",
            });
        }
        if meta.permissions().readonly() {
            return Err(StorageError::NotWritableTarget {
                path: path.to_path_buf(),
            });
        }
    }

    let temp_path = temp_sibling(path)?;

    let result = write_chunks(&temp_path, data).and_then(|()| {
        fs::rename(&temp_path, path).map_err(|e| StorageError::from_io(e, path.to_path_buf()))
    });

    if result.is_err() && temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            warn!("Failed to clean up temp file {:?}: {}", temp_path, e);
        }
    }

    if result.is_ok() {
        debug!("Wrote {} bytes to {:?}", data.len(), path);
    }
    result
}

fn write_chunks(temp_path: &Path, data: &[u8]) -> StorageResult<()> {
    let to_err = |e: std::io::Error| StorageError::from_io(e, temp_path.to_path_buf());

    let mut file = File::create(temp_path).map_err(to_err)?;
    for chunk in data.chunks(WRITE_CHUNK_SIZE) {
        file.write_all(chunk).map_err(to_err)?;
    }
    file.sync_all().map_err(to_err)
}

/// `<dir>/.<name>.<uuid>.tmp`, unique per write
fn temp_sibling(path: &Path) -> StorageResult<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidTarget {
            path: path.to_path_buf(),
            reason: "target has no file name",
        })?;
    let temp_name = format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple());
    Ok(path.with_file_name(temp_name))
}

/// Read `path` as text, concatenating lines without their terminators
pub fn read_text(path: &Path) -> StorageResult<String> {
    let file = File::open(path).map_err(|e| StorageError::from_read_io(e, path.to_path_buf()))?;

    let mut content = String::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| StorageError::from_read_io(e, path.to_path_buf()))?;
        content.push_str(&line);
    }

    debug!("Read {} bytes from {:?}", content.len(), path);
    Ok(content)
}

/// Serialize a JSON object compactly and write it
pub fn write_json_object(path: &Path, document: &Map<String, Value>) -> StorageResult<()> {
    write_json(path, document)
}

/// Serialize a JSON array compactly and write it
pub fn write_json_array(path: &Path, document: &[Value]) -> StorageResult<()> {
    write_json(path, document)
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, document: &T) -> StorageResult<()> {
    let text = serde_json::to_string(document).map_err(|e| StorageError::InvalidJson {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_text(path, &text)
}

/// Read a JSON document that must be an object
pub fn read_json_object(path: &Path) -> StorageResult<Map<String, Value>> {
    match read_json(path)? {
        Value::Object(map) => Ok(map),
        other => Err(shape_mismatch(path, JsonShape::Object, &other)),
    }
}

/// Read a JSON document that must be an array
pub fn read_json_array(path: &Path) -> StorageResult<Vec<Value>> {
    match read_json(path)? {
        Value::Array(values) => Ok(values),
        other => Err(shape_mismatch(path, JsonShape::Array, &other)),
    }
}

fn read_json(path: &Path) -> StorageResult<Value> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|e| StorageError::InvalidJson {
        path: path.to_path_buf(),
        source: e,
    })
}

fn shape_mismatch(path: &Path, expected: JsonShape, found: &Value) -> StorageError {
    StorageError::ShapeMismatch {
        path: path.to_path_buf(),
        expected,
        found: JsonShape::of(found),
    }
}

/// Remove a single file
pub fn delete_file(path: &Path) -> StorageResult<()> {
    if path.is_dir() {
        return Err(StorageError::InvalidTarget {
            path: path.to_path_buf(),
            reason: "refusing to delete a directory as a file",
        });
    }
    fs::remove_file(path).map_err(|e| StorageError::from_io(e, path.to_path_buf()))
}
