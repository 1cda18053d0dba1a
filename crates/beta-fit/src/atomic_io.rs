//! Atomic artifact writes.
//!
//! Every artifact goes to a temporary file in the destination directory,
//! is flushed to disk and then renamed over the destination, so readers
//! never observe a partial file.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{FitError, FitResult};
use crate::tracing_ext::log_artifact_written;

/// Create a directory and its parents.
pub fn ensure_dir(path: &Path) -> FitResult<()> {
    std::fs::create_dir_all(path).map_err(|e| FitError::io_write(path, e))
}

/// Atomically replace `path` with `bytes`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> FitResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| FitError::io_write(path, e))?;
    tmp.write_all(bytes).map_err(|e| FitError::io_write(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| FitError::io_write(path, e))?;
    tmp.persist(path)
        .map_err(|e| FitError::io_write(path, e.error))?;

    log_artifact_written(path, bytes.len());
    Ok(())
}

/// Atomically write pretty-printed JSON with a trailing newline.
pub fn atomic_save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> FitResult<()> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| FitError::parse_error(path, e.to_string()))?;
    text.push('\n');
    atomic_write(path, text.as_bytes())
}

/// Atomically write a text file.
pub fn atomic_save_text(path: &Path, text: &str) -> FitResult<()> {
    atomic_write(path, text.as_bytes())
}

/// Read and parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> FitResult<T> {
    let text = std::fs::read_to_string(path).map_err(|e| FitError::io_read(path, e))?;
    serde_json::from_str(&text).map_err(|e| FitError::parse_error(path, e.to_string()))
}
